use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::session::OptimizationResult;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OptimizationEvent {
    #[serde(rename_all = "camelCase")]
    OptimizationStatus { session_id: Uuid, status: String },
    #[serde(rename_all = "camelCase")]
    OptimizationComplete { session_id: Uuid, result: OptimizationResult },
    #[serde(rename_all = "camelCase")]
    OptimizationError { session_id: Uuid, error: String },
}

impl OptimizationEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            OptimizationEvent::OptimizationStatus { session_id, .. }
            | OptimizationEvent::OptimizationComplete { session_id, .. }
            | OptimizationEvent::OptimizationError { session_id, .. } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizationEvent::OptimizationStatus { .. } => "optimization_status",
            OptimizationEvent::OptimizationComplete { .. } => "optimization_complete",
            OptimizationEvent::OptimizationError { .. } => "optimization_error",
        }
    }
}

/// Publish/subscribe hub for pipeline notifications, keyed by session id.
///
/// Publishing never fails: events with no listener are dropped. A surface
/// subscribes when it mounts and unsubscribes by dropping its receiver.
pub struct EventBus {
    sessions: RwLock<HashMap<Uuid, broadcast::Sender<OptimizationEvent>>>,
    all: broadcast::Sender<OptimizationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sessions: RwLock::new(HashMap::new()), all }
    }
}

impl EventBus {
    pub async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<OptimizationEvent> {
        let mut sessions = self.sessions.write().await;
        // drop channels whose receivers all went away without a publish
        sessions.retain(|_, tx| tx.receiver_count() > 0);
        sessions
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<OptimizationEvent> {
        self.all.subscribe()
    }

    pub async fn publish(&self, event: OptimizationEvent) {
        let session_id = event.session_id();
        tracing::debug!(%session_id, event = event.name(), "publish");
        let _ = self.all.send(event.clone());

        let mut sessions = self.sessions.write().await;
        if let Some(tx) = sessions.get(&session_id) {
            if tx.send(event).is_err() {
                // every receiver for this session is gone
                sessions.remove(&session_id);
            }
        }
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}
