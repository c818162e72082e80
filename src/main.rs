use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod commands;
mod context;
mod error;
mod events;
mod llm;
mod pipeline;
mod server;
mod session;
mod settings;
mod storage;

use crate::events::EventBus;
use crate::llm::GeminiClient;
use crate::pipeline::Optimizer;
use crate::storage::SqliteSessionRepository;

#[derive(Debug, Parser)]
#[command(name = "smart_context")]
#[command(about = "Context-aware prompt optimizer backed by Gemini", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the command and session API over HTTP
    Start {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[arg(long, env = "SMART_CONTEXT_DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Run one optimization and print the resulting prompt
    Optimize {
        #[arg(long)]
        session: Uuid,
        #[arg(long, env = "SMART_CONTEXT_DATABASE_URL")]
        database_url: Option<String>,
    },
}

async fn build_optimizer(database_url: Option<String>) -> anyhow::Result<Optimizer> {
    let repo = SqliteSessionRepository::initialize(database_url).await?;
    let client = GeminiClient::from_env()?;
    tracing::info!(model = %client.config().model, "gemini client ready");
    Ok(Optimizer::new(Arc::new(repo), Arc::new(client), Arc::new(EventBus::default())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen, database_url } => {
            let addr: SocketAddr = listen.parse()?;
            let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
            let optimizer = build_optimizer(database_url).await?;
            let state = server::AppState::new(Arc::new(optimizer)).with_metrics(metrics);
            server::serve(addr, state).await?;
        }
        Commands::Optimize { session, database_url } => {
            let optimizer = build_optimizer(database_url).await?;
            let result = optimizer.optimize(session).await?;
            println!("{}", result.optimized_prompt);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn database_url_flag_falls_back_to_env() {
        let cli = Cli::command();
        for sub in ["start", "optimize"] {
            let arg = cli
                .find_subcommand(sub)
                .and_then(|c| c.get_arguments().find(|a| a.get_id() == "database_url"))
                .unwrap();
            assert_eq!(arg.get_env().and_then(|v| v.to_str()), Some("SMART_CONTEXT_DATABASE_URL"));
        }
    }

    #[test]
    fn optimize_parses_session_and_database_url() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "smart_context",
            "optimize",
            "--session",
            &id.to_string(),
            "--database-url",
            "sqlite:///tmp/s.db",
        ])
        .unwrap();
        match cli.command {
            Commands::Optimize { session, database_url } => {
                assert_eq!(session, id);
                assert_eq!(database_url.as_deref(), Some("sqlite:///tmp/s.db"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
