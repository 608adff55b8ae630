use serde::{Deserialize, Serialize};
use skiff_core::{AuthKind, Provider, SpecialFolder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

/// Shipped server presets for the common providers.
pub fn server_preset(provider: Provider) -> Option<ServerConfig> {
    match provider {
        Provider::Gmail => Some(ServerConfig {
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
        }),
        Provider::Outlook => Some(ServerConfig {
            imap_host: "outlook.office365.com".to_string(),
            imap_port: 993,
            smtp_host: "smtp.office365.com".to_string(),
            smtp_port: 587,
        }),
        Provider::Yahoo => Some(ServerConfig {
            imap_host: "imap.mail.yahoo.com".to_string(),
            imap_port: 993,
            smtp_host: "smtp.mail.yahoo.com".to_string(),
            smtp_port: 465,
        }),
        Provider::Custom => None,
    }
}

pub fn detect_provider(address: &str) -> Provider {
    let domain = address.split('@').nth(1).unwrap_or("").to_lowercase();
    match domain.as_str() {
        "gmail.com" | "googlemail.com" => Provider::Gmail,
        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" => Provider::Outlook,
        "yahoo.com" | "ymail.com" | "rocketmail.com" => Provider::Yahoo,
        _ => Provider::Custom,
    }
}

pub fn default_auth_kind(provider: Provider) -> AuthKind {
    match provider {
        Provider::Gmail | Provider::Outlook => AuthKind::Oauth,
        Provider::Yahoo | Provider::Custom => AuthKind::AppPassword,
    }
}

/// Name-based special-folder detection; works across IMAP servers that do not
/// advertise RFC 6154 attributes.
pub fn detect_special_folder(name: &str) -> Option<SpecialFolder> {
    let lower = name.to_lowercase();
    if lower == "inbox" {
        Some(SpecialFolder::Inbox)
    } else if lower.contains("sent") {
        Some(SpecialFolder::Sent)
    } else if lower.contains("trash") || lower.contains("deleted") {
        Some(SpecialFolder::Trash)
    } else if lower.contains("draft") {
        Some(SpecialFolder::Drafts)
    } else if lower.contains("spam") || lower.contains("junk") {
        Some(SpecialFolder::Spam)
    } else if lower.contains("archive") || lower.contains("all mail") {
        Some(SpecialFolder::Archive)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_detection_by_domain() {
        assert_eq!(detect_provider("a@gmail.com"), Provider::Gmail);
        assert_eq!(detect_provider("a@hotmail.com"), Provider::Outlook);
        assert_eq!(detect_provider("a@ymail.com"), Provider::Yahoo);
        assert_eq!(detect_provider("a@corp.example"), Provider::Custom);
    }

    #[test]
    fn presets_exist_for_known_providers() {
        for provider in [Provider::Gmail, Provider::Outlook, Provider::Yahoo] {
            let preset = server_preset(provider).unwrap();
            assert_eq!(preset.imap_port, 993);
            assert!(preset.smtp_port == 465 || preset.smtp_port == 587);
        }
        assert!(server_preset(Provider::Custom).is_none());
    }

    #[test]
    fn special_folder_names() {
        assert_eq!(detect_special_folder("INBOX"), Some(SpecialFolder::Inbox));
        assert_eq!(
            detect_special_folder("[Gmail]/Sent Mail"),
            Some(SpecialFolder::Sent)
        );
        assert_eq!(
            detect_special_folder("[Gmail]/All Mail"),
            Some(SpecialFolder::Archive)
        );
        assert_eq!(detect_special_folder("Receipts"), None);
    }
}
