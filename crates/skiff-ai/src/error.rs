use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("model {0} is active and cannot be deleted")]
    DeleteActive(String),
    #[error("no language model activated")]
    ModelUnavailable,
    #[error("a generation is already in flight")]
    Busy,
    #[error("model load failed: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}
