use crate::{detect_special_folder, parse_rfc822, MailBackend, MailError};
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use serde::Deserialize;
use skiff_core::{compose_message_id, EmailHeader, EmailMessage, Folder, MailFlag, OutgoingEmail};

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Native HTTPS JSON client for the one provider with a first-party API.
/// Server message ids double as the uid component of the composite id.
#[derive(Clone)]
pub struct GmailBackend {
    account_id: String,
    http: reqwest::Client,
    access_token: String,
}

impl GmailBackend {
    pub fn new(account_id: String, access_token: String) -> Self {
        Self {
            account_id,
            http: reqwest::Client::new(),
            access_token,
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, MailError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!("gmail api {status}: {body}");
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(MailError::Auth(detail))
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(MailError::Transient(detail))
        } else {
            Err(MailError::Permanent(detail))
        }
    }

    async fn modify_labels(
        &self,
        uid: &str,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<(), MailError> {
        let response = self
            .http
            .post(format!("{API_BASE}/messages/{uid}/modify"))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "addLabelIds": add,
                "removeLabelIds": remove,
            }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn message_meta(&self, uid: &str) -> Result<MessageMeta, MailError> {
        let response = self
            .http
            .get(format!("{API_BASE}/messages/{uid}"))
            .bearer_auth(&self.access_token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Date"),
            ])
            .send()
            .await?;

        Ok(self.check(response).await?.json().await?)
    }
}

#[async_trait]
impl MailBackend for GmailBackend {
    async fn list_folders(&self) -> Result<Vec<Folder>, MailError> {
        let response = self
            .http
            .get(format!("{API_BASE}/labels"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let payload: LabelList = self.check(response).await?.json().await?;

        Ok(payload
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|label| {
                let name = label.id;
                let display_name = label.name;
                Folder {
                    special: detect_special_folder(&display_name)
                        .or_else(|| detect_special_folder(&name)),
                    name,
                    display_name,
                    delimiter: Some("/".to_string()),
                }
            })
            .collect())
    }

    async fn fetch_headers(
        &self,
        folder: &str,
        limit: u32,
        offset: u32,
        since_uid: Option<&str>,
    ) -> Result<Vec<EmailHeader>, MailError> {
        let response = self
            .http
            .get(format!("{API_BASE}/messages"))
            .bearer_auth(&self.access_token)
            .query(&[
                ("maxResults", (limit + offset).to_string()),
                ("labelIds", folder.to_string()),
            ])
            .send()
            .await?;
        let listing: MessageList = self.check(response).await?.json().await?;

        let mut headers = Vec::new();
        for item in listing
            .messages
            .unwrap_or_default()
            .into_iter()
            // The listing is newest-first; an incremental pass stops at the
            // watermark instead of paging past it.
            .take_while(|item| since_uid != Some(item.id.as_str()))
            .skip(offset as usize)
            .take(limit as usize)
        {
            let meta = match self.message_meta(&item.id).await {
                Ok(meta) => meta,
                Err(err) if !matches!(err, MailError::Auth(_)) => {
                    tracing::warn!(message = %item.id, error = %err, "skipping unreadable message");
                    continue;
                }
                Err(err) => return Err(err),
            };

            headers.push(meta.into_header(&self.account_id, folder));
        }

        Ok(headers)
    }

    async fn fetch_full(&self, folder: &str, uid: &str) -> Result<EmailMessage, MailError> {
        let response = self
            .http
            .get(format!("{API_BASE}/messages/{uid}"))
            .bearer_auth(&self.access_token)
            .query(&[("format", "raw")])
            .send()
            .await?;
        let payload: RawMessage = self.check(response).await?.json().await?;

        let raw = payload
            .raw
            .as_deref()
            .ok_or_else(|| MailError::Parse(format!("message {uid} has no raw payload")))?;
        let decoded = decode_raw(raw)?;

        let labels = payload.label_ids.unwrap_or_default();
        let is_read = !labels.iter().any(|l| l == "UNREAD");
        let is_starred = labels.iter().any(|l| l == "STARRED");

        let mut message =
            parse_rfc822(&self.account_id, folder, uid, &decoded, is_read, is_starred)?;

        // The server supplies authoritative thread and label data.
        if let Some(thread_id) = payload.thread_id {
            message.thread_id = thread_id;
        }
        if !labels.is_empty() {
            message.labels = labels;
        }
        if let Some(ms) = payload
            .internal_date
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
        {
            message.date = ms / 1000;
        }
        if let Some(snippet) = payload.snippet {
            message.snippet = snippet;
        }

        Ok(message)
    }

    async fn set_flags(
        &self,
        _folder: &str,
        uid: &str,
        flags: &[MailFlag],
        add: bool,
    ) -> Result<(), MailError> {
        let mut add_labels = Vec::new();
        let mut remove_labels = Vec::new();

        for flag in flags {
            match flag {
                // Gmail models "read" as the absence of UNREAD.
                MailFlag::Seen if add => remove_labels.push("UNREAD".to_string()),
                MailFlag::Seen => add_labels.push("UNREAD".to_string()),
                MailFlag::Flagged if add => add_labels.push("STARRED".to_string()),
                MailFlag::Flagged => remove_labels.push("STARRED".to_string()),
                MailFlag::Deleted | MailFlag::Answered | MailFlag::Draft => {}
            }
        }

        if add_labels.is_empty() && remove_labels.is_empty() {
            return Ok(());
        }
        self.modify_labels(uid, add_labels, remove_labels).await
    }

    async fn move_message(
        &self,
        folder: &str,
        uid: &str,
        to_folder: &str,
    ) -> Result<(), MailError> {
        match to_folder {
            "TRASH" => {
                let response = self
                    .http
                    .post(format!("{API_BASE}/messages/{uid}/trash"))
                    .bearer_auth(&self.access_token)
                    .send()
                    .await?;
                self.check(response).await?;
                Ok(())
            }
            // Archiving is just dropping the INBOX label.
            "ARCHIVE" => self.modify_labels(uid, vec![], vec!["INBOX".to_string()]).await,
            _ => {
                self.modify_labels(uid, vec![to_folder.to_string()], vec![folder.to_string()])
                    .await
            }
        }
    }

    async fn delete_message(&self, _folder: &str, uid: &str) -> Result<(), MailError> {
        let response = self
            .http
            .post(format!("{API_BASE}/messages/{uid}/trash"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn send(&self, outgoing: &OutgoingEmail) -> Result<(), MailError> {
        let raw = build_rfc822(outgoing)?;
        let encoded = URL_SAFE_NO_PAD.encode(raw);

        let response = self
            .http
            .post(format!("{API_BASE}/messages/send"))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "raw": encoded }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

fn build_rfc822(outgoing: &OutgoingEmail) -> Result<Vec<u8>, MailError> {
    let from: Mailbox = outgoing
        .from
        .parse()
        .map_err(|err| MailError::Permanent(format!("invalid from address: {err}")))?;

    let mut builder = Message::builder().from(from).subject(outgoing.subject.clone());
    for to in &outgoing.to {
        builder = builder.to(to
            .parse()
            .map_err(|err| MailError::Permanent(format!("invalid to address: {err}")))?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(cc
            .parse()
            .map_err(|err| MailError::Permanent(format!("invalid cc address: {err}")))?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(bcc
            .parse()
            .map_err(|err| MailError::Permanent(format!("invalid bcc address: {err}")))?);
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

    Ok(message.formatted())
}

fn decode_raw(raw: &str) -> Result<Vec<u8>, MailError> {
    URL_SAFE_NO_PAD
        .decode(raw.as_bytes())
        .or_else(|_| URL_SAFE.decode(raw.as_bytes()))
        .map_err(|err| MailError::Parse(format!("invalid raw payload: {err}")))
}

#[derive(Debug, Deserialize)]
struct LabelList {
    labels: Option<Vec<Label>>,
}

#[derive(Debug, Deserialize)]
struct Label {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageMeta {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<MetaPayload>,
}

#[derive(Debug, Deserialize)]
struct MetaPayload {
    #[serde(default)]
    headers: Vec<MetaHeader>,
}

#[derive(Debug, Deserialize)]
struct MetaHeader {
    name: String,
    value: String,
}

impl MessageMeta {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|payload| {
            payload
                .headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.as_str())
        })
    }

    fn into_header(self, account_id: &str, folder: &str) -> EmailHeader {
        let labels = self.label_ids.clone().unwrap_or_default();
        let (from_name, from_address) =
            crate::split_address(self.header("From").unwrap_or_default());
        let subject = self
            .header("Subject")
            .unwrap_or("(No subject)")
            .to_string();
        let date = self
            .internal_date
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(|ms| ms / 1000)
            .or_else(|| {
                self.header("Date")
                    .and_then(|raw| mailparse::dateparse(raw).ok())
            })
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        EmailHeader {
            id: compose_message_id(account_id, folder, &self.id),
            account_id: account_id.to_string(),
            folder: folder.to_string(),
            thread_id: self.thread_id.clone().unwrap_or_default(),
            uid: self.id,
            subject,
            from_name,
            from_address,
            date,
            snippet: self.snippet.unwrap_or_default(),
            is_read: !labels.iter().any(|l| l == "UNREAD"),
            is_starred: labels.iter().any(|l| l == "STARRED"),
            has_attachments: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[allow(dead_code)]
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    label_ids: Option<Vec<String>>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    raw: Option<String>,
    snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_decode_accepts_both_paddings() {
        let encoded = URL_SAFE_NO_PAD.encode(b"hello");
        assert_eq!(decode_raw(&encoded).unwrap(), b"hello");
        let padded = URL_SAFE.encode(b"hello!");
        assert_eq!(decode_raw(&padded).unwrap(), b"hello!");
        assert!(decode_raw("%%%").is_err());
    }

    #[test]
    fn meta_maps_to_header_with_composite_id() {
        let meta = MessageMeta {
            id: "18f3a2b4c5".to_string(),
            thread_id: Some("t-1".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: Some("preview".to_string()),
            internal_date: Some("1752487200000".to_string()),
            payload: Some(MetaPayload {
                headers: vec![
                    MetaHeader {
                        name: "Subject".to_string(),
                        value: "Hi".to_string(),
                    },
                    MetaHeader {
                        name: "From".to_string(),
                        value: "Dana <dana@example.com>".to_string(),
                    },
                ],
            }),
        };

        let header = meta.into_header("acct-1", "INBOX");
        assert_eq!(header.id, "acct-1:INBOX:18f3a2b4c5");
        assert_eq!(header.uid, "18f3a2b4c5");
        assert_eq!(header.subject, "Hi");
        assert_eq!(header.from_address, "dana@example.com");
        assert_eq!(header.date, 1752487200);
        assert!(!header.is_read);
    }

    #[test]
    fn outgoing_mail_renders_to_rfc822() {
        let outgoing = OutgoingEmail {
            from: "me@example.com".to_string(),
            to: vec!["you@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "Ping".to_string(),
            body_plain: "plain".to_string(),
            body_html: Some("<p>rich</p>".to_string()),
        };

        let raw = String::from_utf8(build_rfc822(&outgoing).unwrap()).unwrap();
        assert!(raw.contains("Subject: Ping"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("plain"));
        assert!(raw.contains("<p>rich</p>"));
    }
}
