use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ContextItemType {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "screenshot")]
    Screenshot,
    #[serde(rename = "tab-content")]
    TabContent,
}

impl ContextItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextItemType::File => "file",
            ContextItemType::Screenshot => "screenshot",
            ContextItemType::TabContent => "tab-content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ContextItemType::File),
            "screenshot" => Some(ContextItemType::Screenshot),
            "tab-content" => Some(ContextItemType::TabContent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short summary computed by the capturing surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ContextItemType,
    pub content: String,
    #[serde(default)]
    pub metadata: ContextMetadata,
    pub timestamp: DateTime<Utc>,
}

/// What a surface supplies when attaching context; the store assigns id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewContextItem {
    #[serde(rename = "type")]
    pub kind: ContextItemType,
    pub content: String,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub id: Uuid,
    pub optimized_prompt: String,
    pub used_web_research: bool,
    pub search_queries: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewOptimizationResult {
    pub optimized_prompt: String,
    pub used_web_research: bool,
    pub search_queries: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "archived" { SessionStatus::Archived } else { SessionStatus::Active }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub window_id: i64,
    pub name: String,
    pub task_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub context_items: Vec<ContextItem>,
    pub optimization_history: Vec<OptimizationResult>,
    pub status: SessionStatus,
    pub current_prompt: Option<String>,
    pub prompt_version: u32,
    pub last_optimized_context_ids: Vec<Uuid>,
}

impl Session {
    pub fn new(window_id: i64, name: Option<String>, task_description: String) -> Self {
        let now = Utc::now();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Session {}", now.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")));
        Self {
            id: Uuid::new_v4(),
            window_id,
            name,
            task_description,
            created_at: now,
            updated_at: now,
            context_items: Vec::new(),
            optimization_history: Vec::new(),
            status: SessionStatus::Active,
            current_prompt: None,
            prompt_version: 0,
            last_optimized_context_ids: Vec::new(),
        }
    }

    /// Items attached after the most recent optimization, in insertion order.
    pub fn new_context_items(&self) -> Vec<&ContextItem> {
        self.context_items
            .iter()
            .filter(|item| !self.last_optimized_context_ids.contains(&item.id))
            .collect()
    }
}

/// Partial update of the user-editable session fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub task_description: Option<String>,
    pub window_id: Option<i64>,
    pub status: Option<SessionStatus>,
}

impl SessionUpdate {
    pub fn apply(self, session: &mut Session) {
        if let Some(name) = self.name {
            session.name = name;
        }
        if let Some(task) = self.task_description {
            session.task_description = task;
        }
        if let Some(window_id) = self.window_id {
            session.window_id = window_id;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        session.updated_at = Utc::now();
    }
}
