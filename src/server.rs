use std::convert::Infallible;
use std::{net::SocketAddr, sync::Arc};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::commands::{self, Command, CommandResponse};
use crate::error::{LlmError, OptimizeError, StoreError};
use crate::events::OptimizationEvent;
use crate::pipeline::Optimizer;
use crate::session::{NewContextItem, SessionUpdate};

#[derive(Clone)]
pub struct AppState {
    pub optimizer: Arc<Optimizer>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(optimizer: Arc<Optimizer>) -> Self {
        Self { optimizer, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub struct ApiError(OptimizeError);

impl From<OptimizeError> for ApiError {
    fn from(err: OptimizeError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &OptimizeError) -> StatusCode {
    match err {
        OptimizeError::Store(StoreError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
        OptimizeError::OptimizationInProgress(_) => StatusCode::CONFLICT,
        OptimizeError::Llm(LlmError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        OptimizeError::Llm(_) => StatusCode::BAD_GATEWAY,
        OptimizeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(CommandResponse::err(self.0))).into_response()
    }
}

type ApiResult = Result<Json<CommandResponse>, ApiError>;

async fn run(state: &AppState, cmd: Command) -> ApiResult {
    let data = commands::execute(&state.optimizer, cmd).await?;
    Ok(Json(CommandResponse::ok(data)))
}

async fn post_command(State(state): State<AppState>, Json(cmd): Json<Command>) -> Json<CommandResponse> {
    Json(commands::dispatch(&state.optimizer, cmd).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub window_id: i64,
    pub name: Option<String>,
    pub task_description: Option<String>,
}

async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionBody>) -> ApiResult {
    run(&state, Command::CreateSession {
        window_id: body.window_id,
        name: body.name,
        task_description: body.task_description,
    })
    .await
}

async fn list_sessions(State(state): State<AppState>) -> ApiResult {
    run(&state, Command::GetAllSessions).await
}

async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let data = commands::execute(&state.optimizer, Command::GetSession { session_id: id }).await?;
    if data.is_null() {
        return Err(OptimizeError::from(StoreError::SessionNotFound(id)).into());
    }
    Ok(Json(CommandResponse::ok(data)))
}

async fn patch_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(updates): Json<SessionUpdate>,
) -> ApiResult {
    run(&state, Command::UpdateSession { session_id: id, updates }).await
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    run(&state, Command::DeleteSession { session_id: id }).await
}

async fn add_context(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(item): Json<NewContextItem>,
) -> ApiResult {
    run(&state, Command::AddContextItem { session_id: id, context_item: item }).await
}

async fn remove_context(State(state): State<AppState>, Path((id, item_id)): Path<(Uuid, Uuid)>) -> ApiResult {
    run(&state, Command::RemoveContextItem { session_id: id, item_id }).await
}

async fn optimize(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    run(&state, Command::StartOptimization { session_id: id }).await
}

async fn get_window_session(State(state): State<AppState>, Path(window_id): Path<i64>) -> ApiResult {
    run(&state, Command::GetActiveSession { window_id }).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveBody {
    pub session_id: Uuid,
}

async fn put_window_session(
    State(state): State<AppState>,
    Path(window_id): Path<i64>,
    Json(body): Json<SetActiveBody>,
) -> ApiResult {
    run(&state, Command::SetActiveSession { window_id, session_id: body.session_id }).await
}

fn event_stream(rx: broadcast::Receiver<OptimizationEvent>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        // lagged receivers skip what they missed
        let ev = msg.ok()?;
        Event::default().event(ev.name()).json_data(&ev).ok().map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.optimizer.events().subscribe(id).await)
}

async fn all_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.optimizer.events().subscribe_all())
}

async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.as_ref().map(|h| h.render()).ok_or(StatusCode::NOT_FOUND)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/commands", post(post_command))
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", get(get_session).patch(patch_session).delete(delete_session))
        .route("/v1/sessions/:id/context", post(add_context))
        .route("/v1/sessions/:id/context/:item_id", axum::routing::delete(remove_context))
        .route("/v1/sessions/:id/optimize", post(optimize))
        .route("/v1/sessions/:id/events", get(session_events))
        .route("/v1/events", get(all_events))
        .route("/v1/windows/:window_id/session", get(get_window_session).put(put_window_session))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
