use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{OptimizeError, StoreError};
use crate::pipeline::Optimizer;
use crate::session::{NewContextItem, SessionStatus, SessionUpdate};

/// Requests a surface can send, tagged on the wire as
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    CreateSession {
        window_id: i64,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        task_description: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetActiveSession { window_id: i64 },
    GetAllSessions,
    #[serde(rename_all = "camelCase")]
    GetSession { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UpdateSession { session_id: Uuid, updates: SessionUpdate },
    #[serde(rename_all = "camelCase")]
    DeleteSession { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    SetActiveSession { window_id: i64, session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ArchiveSession { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    AddContextItem { session_id: Uuid, context_item: NewContextItem },
    #[serde(rename_all = "camelCase")]
    RemoveContextItem { session_id: Uuid, item_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetNewContextItems { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ResetCurrentPrompt { session_id: Uuid },
    #[serde(rename_all = "camelCase")]
    StartOptimization { session_id: Uuid },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateSession { .. } => "create_session",
            Command::GetActiveSession { .. } => "get_active_session",
            Command::GetAllSessions => "get_all_sessions",
            Command::GetSession { .. } => "get_session",
            Command::UpdateSession { .. } => "update_session",
            Command::DeleteSession { .. } => "delete_session",
            Command::SetActiveSession { .. } => "set_active_session",
            Command::ArchiveSession { .. } => "archive_session",
            Command::AddContextItem { .. } => "add_context_item",
            Command::RemoveContextItem { .. } => "remove_context_item",
            Command::GetNewContextItems { .. } => "get_new_context_items",
            Command::ResetCurrentPrompt { .. } => "reset_current_prompt",
            Command::StartOptimization { .. } => "start_optimization",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(error: impl ToString) -> Self {
        Self { success: false, data: None, error: Some(error.to_string()) }
    }
}

impl From<Result<Value, OptimizeError>> for CommandResponse {
    fn from(res: Result<Value, OptimizeError>) -> Self {
        match res {
            Ok(v) => CommandResponse::ok(v),
            Err(e) => CommandResponse::err(e),
        }
    }
}

/// Runs one command against the store and the optimizer.
pub async fn execute(optimizer: &Optimizer, cmd: Command) -> Result<Value, OptimizeError> {
    let repo = optimizer.repo();
    tracing::debug!(command = cmd.name(), "execute");
    let value = match cmd {
        Command::CreateSession { window_id, name, task_description } => {
            let session = repo.create_session(window_id, name, task_description.unwrap_or_default()).await?;
            serde_json::to_value(session).map_err(StoreError::from)?
        }
        Command::GetActiveSession { window_id } => {
            let session = repo.get_active_session(window_id).await?;
            serde_json::to_value(session).map_err(StoreError::from)?
        }
        Command::GetAllSessions => serde_json::to_value(repo.list_sessions().await?).map_err(StoreError::from)?,
        Command::GetSession { session_id } => {
            serde_json::to_value(repo.get_session(session_id).await?).map_err(StoreError::from)?
        }
        Command::UpdateSession { session_id, updates } => {
            serde_json::to_value(repo.update_session(session_id, updates).await?).map_err(StoreError::from)?
        }
        Command::DeleteSession { session_id } => json!({ "deleted": repo.delete_session(session_id).await? }),
        Command::SetActiveSession { window_id, session_id } => {
            repo.set_active_session(window_id, session_id).await?;
            Value::Null
        }
        Command::ArchiveSession { session_id } => {
            let update = SessionUpdate { status: Some(SessionStatus::Archived), ..Default::default() };
            serde_json::to_value(repo.update_session(session_id, update).await?).map_err(StoreError::from)?
        }
        Command::AddContextItem { session_id, context_item } => {
            serde_json::to_value(repo.add_context_item(session_id, context_item).await?).map_err(StoreError::from)?
        }
        Command::RemoveContextItem { session_id, item_id } => {
            json!({ "removed": repo.remove_context_item(session_id, item_id).await? })
        }
        Command::GetNewContextItems { session_id } => {
            let session = repo.load_session(session_id).await?;
            serde_json::to_value(session.new_context_items()).map_err(StoreError::from)?
        }
        Command::ResetCurrentPrompt { session_id } => {
            repo.reset_current_prompt(session_id).await?;
            Value::Null
        }
        Command::StartOptimization { session_id } => {
            let result = optimizer.optimize(session_id).await?;
            serde_json::to_value(result).map_err(StoreError::from)?
        }
    };
    Ok(value)
}

pub async fn dispatch(optimizer: &Optimizer, cmd: Command) -> CommandResponse {
    execute(optimizer, cmd).await.into()
}
