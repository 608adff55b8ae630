use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("oauth error: {0}")]
    OAuth(String),
    #[error("no credential stored for account {0}")]
    Missing(String),
    #[error("stored oauth credential expired and could not be refreshed")]
    CredentialExpired,
}
