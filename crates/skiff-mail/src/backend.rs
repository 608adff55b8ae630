use crate::MailError;
use async_trait::async_trait;
use skiff_core::{EmailHeader, EmailMessage, Folder, MailFlag, OutgoingEmail};
use std::future::Future;
use std::time::Duration;

/// Authentication material for a transport connection.
#[derive(Clone)]
pub enum MailCredentials {
    OAuth2 { user: String, access_token: String },
    Password { user: String, password: String },
}

impl MailCredentials {
    pub fn user(&self) -> &str {
        match self {
            MailCredentials::OAuth2 { user, .. } => user,
            MailCredentials::Password { user, .. } => user,
        }
    }
}

impl std::fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailCredentials::OAuth2 { user, .. } => f
                .debug_struct("OAuth2")
                .field("user", user)
                .field("access_token", &"[REDACTED]")
                .finish(),
            MailCredentials::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Provider-agnostic transport capability set. Two implementations exist: the
/// native-API client for Gmail and the generic IMAP/SMTP client; the account's
/// provider tag selects between them.
#[async_trait]
pub trait MailBackend: Send + Sync {
    async fn list_folders(&self) -> Result<Vec<Folder>, MailError>;

    /// Newest-first envelope listing for a folder page. With `since_uid` the
    /// listing is incremental: only messages the server assigned a later uid.
    async fn fetch_headers(
        &self,
        folder: &str,
        limit: u32,
        offset: u32,
        since_uid: Option<&str>,
    ) -> Result<Vec<EmailHeader>, MailError>;

    async fn fetch_full(&self, folder: &str, uid: &str) -> Result<EmailMessage, MailError>;

    async fn set_flags(
        &self,
        folder: &str,
        uid: &str,
        flags: &[MailFlag],
        add: bool,
    ) -> Result<(), MailError>;

    async fn move_message(&self, folder: &str, uid: &str, to_folder: &str)
        -> Result<(), MailError>;

    async fn delete_message(&self, folder: &str, uid: &str) -> Result<(), MailError>;

    async fn send(&self, outgoing: &OutgoingEmail) -> Result<(), MailError>;
}

/// Bounded retry for fetch-style operations: up to three attempts with short
/// exponential backoff, transient errors only.
pub async fn with_retry<T, Fut, F>(operation: &str, mut attempt: F) -> Result<T, MailError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MailError>>,
{
    let mut delay = Duration::from_secs(1);
    for round in 1..=3u32 {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && round < 3 => {
                tracing::warn!(operation, round, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("retry loop returns on the final round")
}
