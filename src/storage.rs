use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous}, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::{
    ContextItem, ContextItemType, ContextMetadata, NewContextItem, NewOptimizationResult, OptimizationResult, Session,
    SessionStatus, SessionUpdate,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: Pool<Sqlite>,
}

/// Durable session state. Every call is a standalone read or write; callers
/// composing load/mutate/save sequences get last-write-wins semantics.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates a session and makes it the active one for `window_id`.
    async fn create_session(&self, window_id: i64, name: Option<String>, task_description: String) -> StoreResult<Session>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;
    async fn list_sessions(&self) -> StoreResult<Vec<Session>>;
    async fn update_session(&self, id: Uuid, update: SessionUpdate) -> StoreResult<Session>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<bool>;
    async fn set_active_session(&self, window_id: i64, session_id: Uuid) -> StoreResult<()>;
    async fn get_active_session(&self, window_id: i64) -> StoreResult<Option<Session>>;
    async fn add_context_item(&self, id: Uuid, item: NewContextItem) -> StoreResult<ContextItem>;
    async fn remove_context_item(&self, id: Uuid, item_id: Uuid) -> StoreResult<bool>;
    /// Appends to the history and advances `current_prompt`, `prompt_version`
    /// and `last_optimized_context_ids` in the same transaction.
    async fn append_optimization_result(&self, id: Uuid, result: NewOptimizationResult) -> StoreResult<OptimizationResult>;
    async fn reset_current_prompt(&self, id: Uuid) -> StoreResult<()>;

    async fn load_session(&self, id: Uuid) -> StoreResult<Session> {
        self.get_session(id).await?.ok_or(StoreError::SessionNotFound(id))
    }
}

impl SqliteSessionRepository {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_millis(5000));
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "session store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }

    async fn ensure_exists(&self, id: Uuid) -> StoreResult<()> {
        let row = sqlx::query("SELECT 1 FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|_| ()).ok_or(StoreError::SessionNotFound(id))
    }

    async fn touch(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("smart_context");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("sessions.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

// Timestamps are cosmetic; a malformed one should not make a session unreadable.
fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn context_item_from_row(row: &SqliteRow) -> StoreResult<ContextItem> {
    let id: String = row.get("id");
    let kind: String = row.get("kind");
    let kind = ContextItemType::parse(&kind)
        .ok_or_else(|| StoreError::Database(sqlx::Error::Decode(format!("unknown context item kind: {kind}").into())))?;
    let metadata_json: String = row.get("metadata_json");
    let metadata: ContextMetadata = serde_json::from_str(&metadata_json)?;
    let created_at: String = row.get("created_at");
    Ok(ContextItem {
        id: parse_uuid(&id)?,
        kind,
        content: row.get("content"),
        metadata,
        timestamp: parse_ts(&created_at),
    })
}

fn optimization_result_from_row(row: &SqliteRow) -> StoreResult<OptimizationResult> {
    let id: String = row.get("id");
    let queries_json: String = row.get("search_queries_json");
    let created_at: String = row.get("created_at");
    Ok(OptimizationResult {
        id: parse_uuid(&id)?,
        optimized_prompt: row.get("optimized_prompt"),
        used_web_research: row.get::<i64, _>("used_web_research") != 0,
        search_queries: serde_json::from_str(&queries_json)?,
        timestamp: parse_ts(&created_at),
    })
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create_session(&self, window_id: i64, name: Option<String>, task_description: String) -> StoreResult<Session> {
        let session = Session::new(window_id, name, task_description);
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO sessions (id, window_id, name, task_description, status, current_prompt, prompt_version, last_optimized_context_ids, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, '[]', ?6, ?7)")
            .bind(session.id.to_string())
            .bind(session.window_id)
            .bind(&session.name)
            .bind(&session.task_description)
            .bind(session.status.as_str())
            .bind(session.created_at.to_rfc3339())
            .bind(session.updated_at.to_rfc3339())
            .execute(&mut *tx).await?;
        sqlx::query("INSERT INTO active_sessions (window_id, session_id) VALUES (?1, ?2) ON CONFLICT(window_id) DO UPDATE SET session_id = excluded.session_id")
            .bind(window_id)
            .bind(session.id.to_string())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT id, window_id, name, task_description, status, current_prompt, prompt_version, last_optimized_context_ids, created_at, updated_at FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(r) = row else { return Ok(None) };

        let item_rows = sqlx::query("SELECT id, kind, content, metadata_json, created_at FROM context_items WHERE session_id = ?1 ORDER BY seq ASC")
            .bind(id.to_string())
            .fetch_all(&self.pool).await?;
        let result_rows = sqlx::query("SELECT id, optimized_prompt, used_web_research, search_queries_json, created_at FROM optimization_results WHERE session_id = ?1 ORDER BY seq ASC")
            .bind(id.to_string())
            .fetch_all(&self.pool).await?;

        let context_items = item_rows.iter().map(context_item_from_row).collect::<StoreResult<Vec<_>>>()?;
        let optimization_history = result_rows.iter().map(optimization_result_from_row).collect::<StoreResult<Vec<_>>>()?;

        let id_str: String = r.get("id");
        let status: String = r.get("status");
        let last_ids: String = r.get("last_optimized_context_ids");
        let created_at: String = r.get("created_at");
        let updated_at: String = r.get("updated_at");
        let session = Session {
            id: parse_uuid(&id_str)?,
            window_id: r.get("window_id"),
            name: r.get("name"),
            task_description: r.get("task_description"),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            context_items,
            optimization_history,
            status: SessionStatus::parse(&status),
            current_prompt: r.try_get::<Option<String>, _>("current_prompt").ok().flatten(),
            prompt_version: r.get::<i64, _>("prompt_version").max(0) as u32,
            last_optimized_context_ids: serde_json::from_str(&last_ids)?,
        };
        Ok(Some(session))
    }

    async fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query("SELECT id FROM sessions ORDER BY created_at DESC").fetch_all(&self.pool).await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for r in rows {
            let id_str: String = r.get("id");
            if let Some(s) = self.get_session(parse_uuid(&id_str)?).await? {
                sessions.push(s);
            }
        }
        Ok(sessions)
    }

    async fn update_session(&self, id: Uuid, update: SessionUpdate) -> StoreResult<Session> {
        let mut session = self.load_session(id).await?;
        update.apply(&mut session);
        sqlx::query("UPDATE sessions SET window_id = ?1, name = ?2, task_description = ?3, status = ?4, updated_at = ?5 WHERE id = ?6")
            .bind(session.window_id)
            .bind(&session.name)
            .bind(&session.task_description)
            .bind(session.status.as_str())
            .bind(session.updated_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool).await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_active_session(&self, window_id: i64, session_id: Uuid) -> StoreResult<()> {
        self.ensure_exists(session_id).await?;
        sqlx::query("INSERT INTO active_sessions (window_id, session_id) VALUES (?1, ?2) ON CONFLICT(window_id) DO UPDATE SET session_id = excluded.session_id")
            .bind(window_id)
            .bind(session_id.to_string())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_active_session(&self, window_id: i64) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT session_id FROM active_sessions WHERE window_id = ?1")
            .bind(window_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(r) = row else { return Ok(None) };
        let id_str: String = r.get("session_id");
        self.get_session(parse_uuid(&id_str)?).await
    }

    async fn add_context_item(&self, id: Uuid, item: NewContextItem) -> StoreResult<ContextItem> {
        self.ensure_exists(id).await?;
        let item = ContextItem {
            id: Uuid::new_v4(),
            kind: item.kind,
            content: item.content,
            metadata: item.metadata,
            timestamp: Utc::now(),
        };
        sqlx::query("INSERT INTO context_items (id, session_id, kind, content, metadata_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
            .bind(item.id.to_string())
            .bind(id.to_string())
            .bind(item.kind.as_str())
            .bind(&item.content)
            .bind(serde_json::to_string(&item.metadata)?)
            .bind(item.timestamp.to_rfc3339())
            .execute(&self.pool).await?;
        self.touch(id).await?;
        Ok(item)
    }

    async fn remove_context_item(&self, id: Uuid, item_id: Uuid) -> StoreResult<bool> {
        self.ensure_exists(id).await?;
        let res = sqlx::query("DELETE FROM context_items WHERE id = ?1 AND session_id = ?2")
            .bind(item_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        self.touch(id).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn append_optimization_result(&self, id: Uuid, result: NewOptimizationResult) -> StoreResult<OptimizationResult> {
        self.ensure_exists(id).await?;
        let result = OptimizationResult {
            id: Uuid::new_v4(),
            optimized_prompt: result.optimized_prompt,
            used_web_research: result.used_web_research,
            search_queries: result.search_queries,
            timestamp: Utc::now(),
        };
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO optimization_results (id, session_id, optimized_prompt, used_web_research, search_queries_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
            .bind(result.id.to_string())
            .bind(id.to_string())
            .bind(&result.optimized_prompt)
            .bind(result.used_web_research)
            .bind(serde_json::to_string(&result.search_queries)?)
            .bind(result.timestamp.to_rfc3339())
            .execute(&mut *tx).await?;
        let item_rows = sqlx::query("SELECT id FROM context_items WHERE session_id = ?1 ORDER BY seq ASC")
            .bind(id.to_string())
            .fetch_all(&mut *tx).await?;
        let item_ids = item_rows
            .iter()
            .map(|r| parse_uuid(&r.get::<String, _>("id")))
            .collect::<StoreResult<Vec<_>>>()?;
        sqlx::query("UPDATE sessions SET current_prompt = ?1, prompt_version = prompt_version + 1, last_optimized_context_ids = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(&result.optimized_prompt)
            .bind(serde_json::to_string(&item_ids)?)
            .bind(result.timestamp.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn reset_current_prompt(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("UPDATE sessions SET current_prompt = NULL, prompt_version = 0, last_optimized_context_ids = '[]', updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::SessionNotFound(id));
        }
        Ok(())
    }
}
