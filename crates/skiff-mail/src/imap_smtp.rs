use crate::{
    detect_special_folder, parse_rfc822, MailBackend, MailCredentials, MailError, ServerConfig,
};
use async_trait::async_trait;
use imap::extensions::idle::WaitOutcome;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use skiff_core::{compose_message_id, EmailHeader, EmailMessage, Folder, MailFlag, OutgoingEmail};
use std::time::Duration;
use tokio::task;

/// Generic IMAP/SMTP transport. IMAP sessions are synchronous and run on the
/// blocking pool, one short-lived session per operation; SMTP sends go through
/// lettre's async transport.
#[derive(Clone)]
pub struct ImapSmtpBackend {
    account_id: String,
    server: ServerConfig,
    credentials: MailCredentials,
}

impl ImapSmtpBackend {
    pub fn new(account_id: String, server: ServerConfig, credentials: MailCredentials) -> Self {
        Self {
            account_id,
            server,
            credentials,
        }
    }

    fn connect(&self) -> Result<imap::Session<imap::Connection>, MailError> {
        let client = imap::ClientBuilder::new(self.server.imap_host.as_str(), self.server.imap_port)
            .connect()
            .map_err(imap_error)?;

        match &self.credentials {
            MailCredentials::OAuth2 { user, access_token } => {
                let authenticator = XOAuth2 {
                    user: user.clone(),
                    access_token: access_token.clone(),
                };
                client
                    .authenticate("XOAUTH2", &authenticator)
                    .map_err(|(err, _client)| MailError::Auth(err.to_string()))
            }
            MailCredentials::Password { user, password } => client
                .login(user.clone(), password.clone())
                .map_err(|(err, _client)| MailError::Auth(err.to_string())),
        }
    }

    /// Enter IDLE on the folder and block until the mailbox changes or the
    /// renewal timeout elapses. Returns whether new activity was seen.
    pub fn idle_wait(&self, folder: &str, timeout: Duration) -> Result<bool, MailError> {
        let mut session = self.connect()?;
        session.select(folder).map_err(imap_error)?;

        let outcome = session
            .idle()
            .timeout(timeout)
            .keepalive(false)
            .wait_while(|_response| false)
            .map_err(imap_error)?;

        let _ = session.logout();
        Ok(matches!(outcome, WaitOutcome::MailboxChanged))
    }

    fn list_folders_blocking(&self) -> Result<Vec<Folder>, MailError> {
        let mut session = self.connect()?;
        let names = session.list(Some(""), Some("*")).map_err(imap_error)?;

        let mut folders = Vec::new();
        for name in names.iter() {
            let full_name = name.name().to_string();
            let display_name = full_name
                .rsplit('/')
                .next()
                .unwrap_or(&full_name)
                .to_string();
            folders.push(Folder {
                special: detect_special_folder(&full_name),
                name: full_name,
                display_name,
                delimiter: name.delimiter().map(str::to_string),
            });
        }

        if folders.is_empty() {
            folders.push(Folder {
                name: "INBOX".to_string(),
                display_name: "INBOX".to_string(),
                special: Some(skiff_core::SpecialFolder::Inbox),
                delimiter: Some("/".to_string()),
            });
        }

        let _ = session.logout();
        Ok(folders)
    }

    fn fetch_headers_blocking(
        &self,
        folder: &str,
        limit: u32,
        offset: u32,
        since_uid: Option<String>,
    ) -> Result<Vec<EmailHeader>, MailError> {
        let mut session = self.connect()?;
        let mailbox = session.select(folder).map_err(imap_error)?;

        let mut headers = Vec::new();

        if let Some(since) = since_uid {
            // Incremental: everything the server assigned after the watermark.
            let since = numeric_uid(&since)?;
            let fetches = session
                .uid_fetch(
                    format!("{}:*", since.saturating_add(1)),
                    "(UID FLAGS ENVELOPE)",
                )
                .map_err(imap_error)?;

            for fetch in fetches.iter() {
                let Some(uid) = fetch.uid else { continue };
                // A "n:*" range echoes the highest message even below n.
                if uid <= since {
                    continue;
                }
                headers.push(self.envelope_to_header(folder, uid, fetch));
            }
        } else {
            let total = mailbox.exists;
            let end = total.saturating_sub(offset);
            if end == 0 {
                let _ = session.logout();
                return Ok(Vec::new());
            }
            let start = end.saturating_sub(limit.saturating_sub(1)).max(1);

            let fetches = session
                .fetch(format!("{start}:{end}"), "(UID FLAGS ENVELOPE)")
                .map_err(imap_error)?;

            for fetch in fetches.iter() {
                let Some(uid) = fetch.uid else { continue };
                headers.push(self.envelope_to_header(folder, uid, fetch));
            }
        }

        let _ = session.logout();
        headers.reverse();
        headers.truncate(limit as usize);
        Ok(headers)
    }

    fn envelope_to_header(&self, folder: &str, uid: u32, fetch: &imap::types::Fetch) -> EmailHeader {
        let mut is_read = false;
        let mut is_starred = false;
        for flag in fetch.flags() {
            match flag {
                imap::types::Flag::Seen => is_read = true,
                imap::types::Flag::Flagged => is_starred = true,
                _ => {}
            }
        }

        let (subject, from_name, from_address, date) = match fetch.envelope() {
            Some(envelope) => {
                let subject = envelope
                    .subject
                    .as_ref()
                    .map(|raw| String::from_utf8_lossy(raw).to_string())
                    .unwrap_or_else(|| "(No subject)".to_string());

                let (from_name, from_address) = envelope
                    .from
                    .as_ref()
                    .and_then(|addrs| addrs.first())
                    .map(|addr| {
                        let name = addr
                            .name
                            .as_ref()
                            .map(|raw| String::from_utf8_lossy(raw).to_string())
                            .unwrap_or_default();
                        let mailbox = addr
                            .mailbox
                            .as_ref()
                            .map(|raw| String::from_utf8_lossy(raw).to_string())
                            .unwrap_or_default();
                        let host = addr
                            .host
                            .as_ref()
                            .map(|raw| String::from_utf8_lossy(raw).to_string())
                            .unwrap_or_default();
                        let address = format!("{mailbox}@{host}");
                        if name.is_empty() {
                            (address.clone(), address)
                        } else {
                            (name, address)
                        }
                    })
                    .unwrap_or_else(|| ("Unknown".to_string(), String::new()));

                let date = envelope
                    .date
                    .as_ref()
                    .and_then(|raw| {
                        mailparse::dateparse(String::from_utf8_lossy(raw).as_ref()).ok()
                    })
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());

                (subject, from_name, from_address, date)
            }
            None => (
                "(No subject)".to_string(),
                "Unknown".to_string(),
                String::new(),
                chrono::Utc::now().timestamp(),
            ),
        };

        let uid = uid.to_string();
        EmailHeader {
            id: compose_message_id(&self.account_id, folder, &uid),
            account_id: self.account_id.clone(),
            folder: folder.to_string(),
            uid,
            thread_id: String::new(),
            subject,
            from_name,
            from_address,
            date,
            snippet: String::new(),
            is_read,
            is_starred,
            has_attachments: false,
        }
    }

    fn fetch_full_blocking(&self, folder: &str, uid: &str) -> Result<EmailMessage, MailError> {
        numeric_uid(uid)?;
        let mut session = self.connect()?;
        session.select(folder).map_err(imap_error)?;

        let fetches = session
            .uid_fetch(uid, "(UID FLAGS BODY.PEEK[])")
            .map_err(imap_error)?;
        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| MailError::Permanent(format!("message {uid} not found in {folder}")))?;

        let body = fetch
            .body()
            .ok_or_else(|| MailError::Parse(format!("message {uid} has no body")))?;

        let mut is_read = false;
        let mut is_starred = false;
        for flag in fetch.flags() {
            match flag {
                imap::types::Flag::Seen => is_read = true,
                imap::types::Flag::Flagged => is_starred = true,
                _ => {}
            }
        }

        let message = parse_rfc822(&self.account_id, folder, uid, body, is_read, is_starred)?;
        let _ = session.logout();
        Ok(message)
    }

    fn set_flags_blocking(
        &self,
        folder: &str,
        uid: &str,
        flags: &[MailFlag],
        add: bool,
    ) -> Result<(), MailError> {
        numeric_uid(uid)?;
        let mut session = self.connect()?;
        session.select(folder).map_err(imap_error)?;

        let flag_list = flags
            .iter()
            .map(|flag| flag.to_imap_str())
            .collect::<Vec<_>>()
            .join(" ");
        let query = if add {
            format!("+FLAGS ({flag_list})")
        } else {
            format!("-FLAGS ({flag_list})")
        };

        session.uid_store(uid, query).map_err(imap_error)?;
        let _ = session.logout();
        Ok(())
    }

    fn move_blocking(&self, folder: &str, uid: &str, to_folder: &str) -> Result<(), MailError> {
        numeric_uid(uid)?;
        let mut session = self.connect()?;
        session.select(folder).map_err(imap_error)?;

        // MOVE (RFC 6851) when the server has it, COPY+DELETE+EXPUNGE otherwise.
        if session.uid_mv(uid, to_folder).is_err() {
            session.uid_copy(uid, to_folder).map_err(imap_error)?;
            session
                .uid_store(uid, "+FLAGS (\\Deleted)")
                .map_err(imap_error)?;
            session.expunge().map_err(imap_error)?;
        }

        let _ = session.logout();
        Ok(())
    }

    fn delete_blocking(&self, folder: &str, uid: &str) -> Result<(), MailError> {
        numeric_uid(uid)?;
        let mut session = self.connect()?;
        session.select(folder).map_err(imap_error)?;
        session
            .uid_store(uid, "+FLAGS (\\Deleted)")
            .map_err(imap_error)?;
        session.expunge().map_err(imap_error)?;
        let _ = session.logout();
        Ok(())
    }

    async fn smtp_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let builder = if self.server.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server.smtp_host)
                .map_err(|err| MailError::Permanent(err.to_string()))?
                .port(self.server.smtp_port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server.smtp_host)
                .map_err(|err| MailError::Permanent(err.to_string()))?
                .port(self.server.smtp_port)
        };

        let transport = match &self.credentials {
            MailCredentials::OAuth2 { user, access_token } => builder
                .credentials(Credentials::new(user.clone(), access_token.clone()))
                .authentication(vec![Mechanism::Xoauth2])
                .build(),
            MailCredentials::Password { user, password } => builder
                .credentials(Credentials::new(user.clone(), password.clone()))
                .build(),
        };

        Ok(transport)
    }
}

#[async_trait]
impl MailBackend for ImapSmtpBackend {
    async fn list_folders(&self) -> Result<Vec<Folder>, MailError> {
        let this = self.clone();
        task::spawn_blocking(move || this.list_folders_blocking())
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn fetch_headers(
        &self,
        folder: &str,
        limit: u32,
        offset: u32,
        since_uid: Option<&str>,
    ) -> Result<Vec<EmailHeader>, MailError> {
        let this = self.clone();
        let folder = folder.to_string();
        let since_uid = since_uid.map(str::to_string);
        task::spawn_blocking(move || this.fetch_headers_blocking(&folder, limit, offset, since_uid))
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn fetch_full(&self, folder: &str, uid: &str) -> Result<EmailMessage, MailError> {
        let this = self.clone();
        let folder = folder.to_string();
        let uid = uid.to_string();
        task::spawn_blocking(move || this.fetch_full_blocking(&folder, &uid))
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn set_flags(
        &self,
        folder: &str,
        uid: &str,
        flags: &[MailFlag],
        add: bool,
    ) -> Result<(), MailError> {
        let this = self.clone();
        let folder = folder.to_string();
        let uid = uid.to_string();
        let flags = flags.to_vec();
        task::spawn_blocking(move || this.set_flags_blocking(&folder, &uid, &flags, add))
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn move_message(
        &self,
        folder: &str,
        uid: &str,
        to_folder: &str,
    ) -> Result<(), MailError> {
        let this = self.clone();
        let folder = folder.to_string();
        let uid = uid.to_string();
        let to_folder = to_folder.to_string();
        task::spawn_blocking(move || this.move_blocking(&folder, &uid, &to_folder))
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn delete_message(&self, folder: &str, uid: &str) -> Result<(), MailError> {
        let this = self.clone();
        let folder = folder.to_string();
        let uid = uid.to_string();
        task::spawn_blocking(move || this.delete_blocking(&folder, &uid))
            .await
            .map_err(|err| MailError::Permanent(err.to_string()))?
    }

    async fn send(&self, outgoing: &OutgoingEmail) -> Result<(), MailError> {
        let from: Mailbox = outgoing
            .from
            .parse()
            .map_err(|err| MailError::Permanent(format!("invalid from address: {err}")))?;

        let mut builder = Message::builder().from(from).subject(outgoing.subject.clone());
        for to in &outgoing.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|err| MailError::Permanent(format!("invalid to address: {err}")))?;
            builder = builder.to(mailbox);
        }
        for cc in &outgoing.cc {
            let mailbox: Mailbox = cc
                .parse()
                .map_err(|err| MailError::Permanent(format!("invalid cc address: {err}")))?;
            builder = builder.cc(mailbox);
        }
        for bcc in &outgoing.bcc {
            let mailbox: Mailbox = bcc
                .parse()
                .map_err(|err| MailError::Permanent(format!("invalid bcc address: {err}")))?;
            builder = builder.bcc(mailbox);
        }

        let message = match &outgoing.body_html {
            Some(html) => builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_PLAIN)
                                .body(outgoing.body_plain.clone()),
                        )
                        .singlepart(
                            SinglePart::builder()
                                .header(ContentType::TEXT_HTML)
                                .body(html.clone()),
                        ),
                )
                .map_err(|err| MailError::Permanent(err.to_string()))?,
            None => builder
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(outgoing.body_plain.clone()),
                )
                .map_err(|err| MailError::Permanent(err.to_string()))?,
        };

        let transport = self.smtp_transport().await?;
        transport
            .send(message)
            .await
            .map_err(|err| MailError::Transient(err.to_string()))?;

        Ok(())
    }
}

/// XOAUTH2 SASL initial response.
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _data: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

fn numeric_uid(uid: &str) -> Result<u32, MailError> {
    uid.parse::<u32>()
        .map_err(|_| MailError::Parse(format!("non-numeric IMAP uid: {uid}")))
}

fn imap_error(error: imap::Error) -> MailError {
    match error {
        imap::Error::Io(err) => MailError::Transient(err.to_string()),
        imap::Error::ConnectionLost => MailError::Transient("connection lost".to_string()),
        other => MailError::Permanent(other.to_string()),
    }
}
