use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve platform application directories")]
    MissingDirectories,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
