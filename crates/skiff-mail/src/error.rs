use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    /// Credential action required; not retryable without re-authentication.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Worth retrying with backoff.
    #[error("transient transport error: {0}")]
    Transient(String),
    /// Report to the caller; do not retry.
    #[error("permanent transport error: {0}")]
    Permanent(String),
    /// Malformed message; record and skip.
    #[error("malformed message: {0}")]
    Parse(String),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

impl From<std::io::Error> for MailError {
    fn from(err: std::io::Error) -> Self {
        MailError::Transient(err.to_string())
    }
}

impl From<mailparse::MailParseError> for MailError {
    fn from(err: mailparse::MailParseError) -> Self {
        MailError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            MailError::Transient(err.to_string())
        } else {
            MailError::Permanent(err.to_string())
        }
    }
}
