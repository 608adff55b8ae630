mod commands;
mod error;
mod events;
mod pipeline;
mod retrieval;
mod state;

pub use commands::{EmailSummary, OAuthTokens, SignInRequest, StorageInfo};
pub use error::EngineError;
pub use events::{EmbeddingProgress, EngineEvent, EventBus};
pub use retrieval::SearchResult;
pub use state::EmailEngine;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the engine's tracing subscriber. Call once from the hosting shell.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
