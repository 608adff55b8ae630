use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProgress {
    pub total: i64,
    pub done: i64,
    pub id: String,
}

/// Typed engine events. Each variant maps to a stable topic consumed by the
/// shell; delivery is best-effort to live subscribers with no persistence.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MailNew { account_id: String, folder: String },
    IndexingStarted,
    /// Integer percent in [0, 100], non-decreasing within a run.
    IndexingProgress { percent: u8 },
    IndexingComplete,
    IndexingError { message: String },
    EmbeddingStarted { total: i64 },
    EmbeddingProgress(EmbeddingProgress),
    EmbeddingComplete { count: i64 },
    EmbeddingError { message: String },
    ModelProgress { percent: f32 },
    ModelComplete { model_id: String },
    ModelError { message: String },
    AiToken { token: String },
}

impl EngineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::MailNew { .. } => "mail:new",
            EngineEvent::IndexingStarted => "indexing:started",
            EngineEvent::IndexingProgress { .. } => "indexing:progress",
            EngineEvent::IndexingComplete => "indexing:complete",
            EngineEvent::IndexingError { .. } => "indexing:error",
            EngineEvent::EmbeddingStarted { .. } => "embedding:started",
            EngineEvent::EmbeddingProgress(_) => "embedding:progress",
            EngineEvent::EmbeddingComplete { .. } => "embedding:complete",
            EngineEvent::EmbeddingError { .. } => "embedding:error",
            EngineEvent::ModelProgress { .. } => "model:progress",
            EngineEvent::ModelComplete { .. } => "model:complete",
            EngineEvent::ModelError { .. } => "model:error",
            EngineEvent::AiToken { .. } => "ai:token",
        }
    }
}

/// Multi-producer/multi-consumer broadcast bus. Lagging subscribers lose the
/// oldest events rather than blocking producers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // A send with no live subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
