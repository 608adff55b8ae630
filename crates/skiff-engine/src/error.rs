use skiff_ai::AiError;
use skiff_config::ConfigError;
use skiff_mail::MailError;
use skiff_security::SecurityError;
use skiff_storage::StorageError;
use skiff_vector::VectorError;
use thiserror::Error;

/// Error taxonomy surfaced at the command boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("stored credential expired")]
    CredentialExpired,
    #[error("transient transport error: {0}")]
    TransportTransient(String),
    #[error("transport error: {0}")]
    TransportPermanent(String),
    #[error("malformed message: {0}")]
    Parse(String),
    #[error("no language model activated")]
    ModelUnavailable,
    #[error("{0} is already running")]
    Busy(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MailError> for EngineError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Auth(msg) => EngineError::AuthRequired(msg),
            MailError::Transient(msg) => EngineError::TransportTransient(msg),
            MailError::Permanent(msg) => EngineError::TransportPermanent(msg),
            MailError::Parse(msg) => EngineError::Parse(msg),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => EngineError::NotFound(what),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<VectorError> for EngineError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::NotFound(what) => EngineError::NotFound(what),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<AiError> for EngineError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::ModelUnavailable => EngineError::ModelUnavailable,
            AiError::Busy => EngineError::Busy("generation".to_string()),
            AiError::UnknownModel(id) | AiError::NotDownloaded(id) => EngineError::NotFound(id),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<SecurityError> for EngineError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::CredentialExpired => EngineError::CredentialExpired,
            SecurityError::Missing(account) => EngineError::AuthRequired(account),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Internal(err.to_string())
    }
}
