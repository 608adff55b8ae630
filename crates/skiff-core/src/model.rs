use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
    Yahoo,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Outlook => "outlook",
            Provider::Yahoo => "yahoo",
            Provider::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "gmail" | "google" => Provider::Gmail,
            "outlook" | "microsoft" | "hotmail" => Provider::Outlook,
            "yahoo" => Provider::Yahoo,
            _ => Provider::Custom,
        }
    }

    /// Gmail talks to its native HTTPS API; everything else goes through IMAP/SMTP.
    pub fn uses_native_api(&self) -> bool {
        matches!(self, Provider::Gmail)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Oauth,
    AppPassword,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Oauth => "oauth",
            AuthKind::AppPassword => "app_password",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "oauth" | "oauth2" => AuthKind::Oauth,
            _ => AuthKind::AppPassword,
        }
    }
}

/// A configured mailbox identity. At most one account is active at a time;
/// activation is enforced by the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub address: String,
    pub display_name: String,
    pub provider: Provider,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub auth_kind: AuthKind,
    pub is_active: bool,
    pub created_at: i64,
    pub last_synced_at: Option<i64>,
}

impl Account {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: String,
        display_name: String,
        provider: Provider,
        imap_host: String,
        imap_port: u16,
        smtp_host: String,
        smtp_port: u16,
        auth_kind: AuthKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address,
            display_name,
            provider,
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            auth_kind,
            is_active: true,
            created_at: Utc::now().timestamp(),
            last_synced_at: None,
        }
    }
}

/// Deterministic composite message id. Re-fetching the same message always
/// yields the same id. The uid is the server-assigned per-folder identifier:
/// a numeric IMAP UID, or the provider's message id for native-API accounts.
pub fn compose_message_id(account_id: &str, folder: &str, uid: &str) -> String {
    format!("{account_id}:{folder}:{uid}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub account_id: String,
    pub folder: String,
    pub uid: String,
    /// RFC 5322 Message-ID header, empty when the server omitted it.
    pub message_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    /// Unix timestamp (seconds).
    pub date: i64,
    pub snippet: String,
    pub body_html: Option<String>,
    pub body_plain: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub labels: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EmailMessage {
    pub fn body(&self) -> &str {
        self.body_plain
            .as_deref()
            .or(self.body_html.as_deref())
            .unwrap_or_default()
    }
}

/// Envelope-level listing row returned by header fetches; bodies are fetched
/// separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailHeader {
    pub id: String,
    pub account_id: String,
    pub folder: String,
    pub uid: String,
    pub thread_id: String,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub date: i64,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Priority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

impl Priority {
    /// Total, monotone bucketing: HIGH at 0.7, MEDIUM at 0.4, LOW below.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Priority::High
        } else if score >= 0.4 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "HIGH" => Priority::High,
            "LOW" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// Per-message AI annotation. One row per message, cascade-deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailInsight {
    pub message_id: String,
    pub summary: Option<String>,
    pub priority: Priority,
    pub priority_score: f64,
    pub category: Option<String>,
    /// Short insight lines, JSON-encoded in storage.
    pub insights: Vec<String>,
    pub action_items: Vec<String>,
    pub has_deadline: bool,
    pub has_meeting: bool,
    pub has_financial: bool,
    pub sentiment: Option<String>,
    pub indexed_at: i64,
}

/// The messages ⋈ insights join row served by the retrieval layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWithInsight {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub date: i64,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub priority: Priority,
    pub priority_score: f64,
    pub category: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub is_running: bool,
    pub total: i64,
    pub processed: i64,
    pub last_run_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStatus {
    pub is_running: bool,
    pub total: i64,
    pub embedded: i64,
    pub current_model: Option<String>,
    pub last_run_at: Option<i64>,
    pub error: Option<String>,
}

/// Well-known special folder roles (RFC 6154).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecialFolder {
    Inbox,
    Sent,
    Trash,
    Drafts,
    Spam,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    /// Full server-side path, e.g. `[Gmail]/Sent Mail`.
    pub name: String,
    pub display_name: String,
    pub special: Option<SpecialFolder>,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailFlag {
    Seen,
    Flagged,
    Answered,
    Deleted,
    Draft,
}

impl MailFlag {
    pub fn to_imap_str(&self) -> &'static str {
        match self {
            MailFlag::Seen => "\\Seen",
            MailFlag::Flagged => "\\Flagged",
            MailFlag::Answered => "\\Answered",
            MailFlag::Deleted => "\\Deleted",
            MailFlag::Draft => "\\Draft",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_plain: String,
    pub body_html: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_deterministic_composite() {
        let first = compose_message_id("acct-1", "INBOX", "42");
        let second = compose_message_id("acct-1", "INBOX", "42");
        assert_eq!(first, "acct-1:INBOX:42");
        assert_eq!(first, second);
        assert_ne!(first, compose_message_id("acct-1", "Sent", "42"));
    }

    #[test]
    fn priority_bucketing_is_total() {
        for step in 0..=100 {
            let score = step as f64 / 100.0;
            // Every score lands in exactly one bucket.
            let bucket = Priority::from_score(score);
            match bucket {
                Priority::High => assert!(score >= 0.7),
                Priority::Medium => assert!((0.4..0.7).contains(&score)),
                Priority::Low => assert!(score < 0.4),
            }
        }
    }

    #[test]
    fn priority_bucketing_is_monotone() {
        fn rank(p: Priority) -> u8 {
            match p {
                Priority::Low => 0,
                Priority::Medium => 1,
                Priority::High => 2,
            }
        }

        let mut prev = rank(Priority::from_score(0.0));
        for step in 1..=100 {
            let next = rank(Priority::from_score(step as f64 / 100.0));
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn priority_boundaries() {
        assert_eq!(Priority::from_score(0.7), Priority::High);
        assert_eq!(Priority::from_score(0.699), Priority::Medium);
        assert_eq!(Priority::from_score(0.4), Priority::Medium);
        assert_eq!(Priority::from_score(0.399), Priority::Low);
    }

    #[test]
    fn provider_roundtrip() {
        for provider in [
            Provider::Gmail,
            Provider::Outlook,
            Provider::Yahoo,
            Provider::Custom,
        ] {
            assert_eq!(Provider::parse(provider.as_str()), provider);
        }
        assert_eq!(Provider::parse("hotmail"), Provider::Outlook);
    }
}
