mod backend;
mod error;
mod gmail;
mod idle;
mod imap_smtp;
mod parse;
mod presets;

pub use backend::{with_retry, MailBackend, MailCredentials};
pub use error::MailError;
pub use gmail::GmailBackend;
pub use idle::{IdleManager, IdleSchedule, NewMailEvent, IDLE_RENEWAL, IDLE_RETRY_DELAY};
pub use imap_smtp::ImapSmtpBackend;
pub use parse::{derive_thread_id, parse_rfc822, split_address};
pub use presets::{
    default_auth_kind, detect_provider, detect_special_folder, server_preset, ServerConfig,
};
