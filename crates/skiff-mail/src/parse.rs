use crate::MailError;
use chrono::Utc;
use mailparse::{parse_mail, ParsedMail};
use skiff_core::{compose_message_id, EmailMessage};

/// Parse a raw RFC822 message into the engine's message record. The id is the
/// deterministic composite of account, folder and server uid, so re-fetching
/// the same message always produces the same row.
pub fn parse_rfc822(
    account_id: &str,
    folder: &str,
    uid: &str,
    raw: &[u8],
    is_read: bool,
    is_starred: bool,
) -> Result<EmailMessage, MailError> {
    let parsed = parse_mail(raw)?;

    let subject = header_value(&parsed, "Subject").unwrap_or_else(|| "(No subject)".to_string());
    let message_id = header_value(&parsed, "Message-ID")
        .map(|raw| raw.trim().to_string())
        .unwrap_or_default();

    let (from_name, from_address) =
        split_address(&header_value(&parsed, "From").unwrap_or_default());
    let to = header_value(&parsed, "To")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let date = header_value(&parsed, "Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok())
        .unwrap_or_else(|| Utc::now().timestamp());

    let body_plain = extract_text_body(&parsed);
    let body_html = extract_html_body(&parsed).map(|html| ammonia::clean(&html));

    let snippet = body_plain
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect::<String>()
        .replace(['\n', '\r'], " ");

    let thread_id = derive_thread_id(
        header_value(&parsed, "In-Reply-To").as_deref(),
        header_value(&parsed, "References").as_deref(),
        &message_id,
    );
    let id = compose_message_id(account_id, folder, uid);
    // Headers with no Message-ID still need a stable thread root.
    let thread_id = if thread_id.is_empty() { id.clone() } else { thread_id };

    let mut labels = Vec::new();
    if !is_read {
        labels.push("UNREAD".to_string());
    }
    if is_starred {
        labels.push("STARRED".to_string());
    }
    if folder.eq_ignore_ascii_case("INBOX") {
        labels.push("INBOX".to_string());
    }

    let now = Utc::now().timestamp();
    Ok(EmailMessage {
        id,
        account_id: account_id.to_string(),
        folder: folder.to_string(),
        uid: uid.to_string(),
        message_id,
        thread_id,
        subject,
        from_name,
        from_address,
        to,
        date,
        snippet,
        body_html,
        body_plain,
        is_read,
        is_starred,
        has_attachments: has_attachments(&parsed),
        labels,
        created_at: now,
        updated_at: now,
    })
}

/// Thread id derivation when the server supplies none: the earliest known
/// ancestor wins. `References` lists ancestors oldest-first, so its first
/// entry is the thread root; `In-Reply-To` is the immediate parent; a message
/// with neither roots its own thread.
pub fn derive_thread_id(
    in_reply_to: Option<&str>,
    references: Option<&str>,
    own_message_id: &str,
) -> String {
    if let Some(refs) = references {
        if let Some(root) = refs.split_whitespace().next() {
            if !root.is_empty() {
                return root.to_string();
            }
        }
    }

    if let Some(parent) = in_reply_to {
        let parent = parent.trim();
        if !parent.is_empty() {
            return parent.split_whitespace().next().unwrap_or(parent).to_string();
        }
    }

    own_message_id.to_string()
}

/// Split `Name <addr>` into display name and address.
pub fn split_address(raw: &str) -> (String, String) {
    let value = raw.trim();
    if value.is_empty() {
        return ("Unknown".to_string(), String::new());
    }

    if let (Some(lt), Some(gt)) = (value.rfind('<'), value.rfind('>')) {
        if lt < gt {
            let name = value[..lt].trim().trim_matches('"').trim().to_string();
            let address = value[lt + 1..gt].trim().to_string();
            if name.is_empty() {
                return (address.clone(), address);
            }
            return (name, address);
        }
    }

    (value.to_string(), value.to_string())
}

fn header_value(mail: &ParsedMail<'_>, key: &str) -> Option<String> {
    for header in mail.get_headers() {
        if header.get_key_ref().eq_ignore_ascii_case(key) {
            return Some(header.get_value());
        }
    }
    None
}

fn extract_text_body(mail: &ParsedMail<'_>) -> Option<String> {
    if mail.subparts.is_empty() {
        let content_type = mail.ctype.mimetype.to_ascii_lowercase();
        if content_type == "text/plain" || content_type == "text/markdown" {
            return mail.get_body().ok();
        }
        return None;
    }

    for part in &mail.subparts {
        if let Some(text) = extract_text_body(part) {
            return Some(text);
        }
    }
    None
}

fn extract_html_body(mail: &ParsedMail<'_>) -> Option<String> {
    if mail.subparts.is_empty() {
        if mail.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            return mail.get_body().ok();
        }
        return None;
    }

    for part in &mail.subparts {
        if let Some(html) = extract_html_body(part) {
            return Some(html);
        }
    }
    None
}

fn has_attachments(mail: &ParsedMail<'_>) -> bool {
    if mail.subparts.is_empty() {
        return header_value(mail, "Content-Disposition")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .contains("attachment");
    }

    mail.subparts.iter().any(has_attachments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"Message-ID: <abc@example.com>\r\n\
From: Dana Smith <dana@example.com>\r\n\
To: me@example.com\r\n\
Subject: Hello there\r\n\
Date: Mon, 14 Jul 2025 10:00:00 +0000\r\n\
Content-Type: text/plain\r\n\
\r\n\
Just checking in.\r\n";

    #[test]
    fn two_parses_yield_the_same_id() {
        let first = parse_rfc822("acct-1", "INBOX", "9", RAW, false, false).unwrap();
        let second = parse_rfc822("acct-1", "INBOX", "9", RAW, false, false).unwrap();
        assert_eq!(first.id, "acct-1:INBOX:9");
        assert_eq!(first.id, second.id);
        assert_eq!(first.thread_id, second.thread_id);
    }

    #[test]
    fn parses_envelope_fields() {
        let message = parse_rfc822("acct-1", "INBOX", "9", RAW, true, false).unwrap();
        assert_eq!(message.subject, "Hello there");
        assert_eq!(message.from_name, "Dana Smith");
        assert_eq!(message.from_address, "dana@example.com");
        assert_eq!(message.to, vec!["me@example.com".to_string()]);
        assert!(message
            .body_plain
            .as_deref()
            .unwrap()
            .contains("Just checking in."));
        assert!(message.is_read);
        assert!(!message.labels.contains(&"UNREAD".to_string()));
        assert!(message.labels.contains(&"INBOX".to_string()));
    }

    #[test]
    fn thread_id_prefers_references_root() {
        assert_eq!(
            derive_thread_id(
                Some("<parent@x>"),
                Some("<root@x> <mid@x> <parent@x>"),
                "<self@x>"
            ),
            "<root@x>"
        );
        assert_eq!(
            derive_thread_id(Some("<parent@x>"), None, "<self@x>"),
            "<parent@x>"
        );
        assert_eq!(derive_thread_id(None, None, "<self@x>"), "<self@x>");
    }

    #[test]
    fn threadless_message_roots_its_own_thread() {
        let raw = b"From: a@example.com\r\nSubject: No ids here\r\n\r\nbody\r\n";
        let message = parse_rfc822("acct-1", "INBOX", "3", raw, false, false).unwrap();
        assert_eq!(message.thread_id, message.id);
    }

    #[test]
    fn address_splitting() {
        assert_eq!(
            split_address("Dana Smith <dana@example.com>"),
            ("Dana Smith".to_string(), "dana@example.com".to_string())
        );
        assert_eq!(
            split_address("dana@example.com"),
            ("dana@example.com".to_string(), "dana@example.com".to_string())
        );
        assert_eq!(split_address(""), ("Unknown".to_string(), String::new()));
    }

    #[test]
    fn html_bodies_are_sanitized() {
        let raw = b"From: a@example.com\r\nSubject: html\r\nContent-Type: text/html\r\n\r\n<p>hi</p><script>evil()</script>\r\n";
        let message = parse_rfc822("acct-1", "INBOX", "4", raw, false, false).unwrap();
        let html = message.body_html.unwrap();
        assert!(html.contains("<p>hi</p>"));
        assert!(!html.contains("script"));
    }
}
