use crate::{oauth_profile_for, OAuthWorkflow, SecretKey, SecretStore, SecurityError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use skiff_core::Account;
use std::sync::Arc;
use std::time::Duration;

/// Refresh ahead of expiry by at least this margin.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Hard deadline on the token-endpoint call.
const REFRESH_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    AccessToken,
    RefreshToken,
    TokenExpiry,
    AppPassword,
}

impl SecretKind {
    fn namespace(&self) -> &'static str {
        match self {
            SecretKind::AccessToken => "oauth_access_token",
            SecretKind::RefreshToken => "oauth_refresh_token",
            SecretKind::TokenExpiry => "oauth_token_expiry",
            SecretKind::AppPassword => "app_password",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Per-account credential material on top of [`SecretStore`], with
/// transparent OAuth refresh when the access token nears expiry.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    secrets: Arc<SecretStore>,
}

impl CredentialStore {
    pub fn new(secrets: Arc<SecretStore>) -> Self {
        Self { secrets }
    }

    pub fn put(&self, account_id: &str, kind: SecretKind, secret: &str) -> Result<(), SecurityError> {
        self.secrets
            .set(&SecretKey::new(kind.namespace(), account_id), secret)
    }

    pub fn get(&self, account_id: &str, kind: SecretKind) -> Result<Option<String>, SecurityError> {
        self.secrets
            .get(&SecretKey::new(kind.namespace(), account_id))
    }

    pub fn delete(&self, account_id: &str, kind: SecretKind) -> Result<(), SecurityError> {
        self.secrets
            .delete(&SecretKey::new(kind.namespace(), account_id))
    }

    pub fn clear_account(&self, account_id: &str) -> Result<(), SecurityError> {
        for kind in [
            SecretKind::AccessToken,
            SecretKind::RefreshToken,
            SecretKind::TokenExpiry,
            SecretKind::AppPassword,
        ] {
            self.delete(account_id, kind)?;
        }
        Ok(())
    }

    pub fn store_tokens(&self, account_id: &str, tokens: &TokenData) -> Result<(), SecurityError> {
        self.put(account_id, SecretKind::AccessToken, &tokens.access_token)?;
        if let Some(refresh) = &tokens.refresh_token {
            self.put(account_id, SecretKind::RefreshToken, refresh)?;
        }
        self.put(
            account_id,
            SecretKind::TokenExpiry,
            &tokens.expires_at.to_rfc3339(),
        )?;
        Ok(())
    }

    pub fn load_tokens(&self, account_id: &str) -> Result<Option<TokenData>, SecurityError> {
        let Some(access_token) = self.get(account_id, SecretKind::AccessToken)? else {
            return Ok(None);
        };
        let refresh_token = self.get(account_id, SecretKind::RefreshToken)?;
        let expires_at = self
            .get(account_id, SecretKind::TokenExpiry)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Some(TokenData {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    pub fn app_password(&self, account_id: &str) -> Result<String, SecurityError> {
        self.get(account_id, SecretKind::AppPassword)?
            .ok_or_else(|| SecurityError::Missing(account_id.to_string()))
    }

    /// Current access token for the account, refreshed first when expiry is
    /// within the safety margin.
    pub async fn access_token(&self, account: &Account) -> Result<String, SecurityError> {
        let tokens = self
            .load_tokens(&account.id)?
            .ok_or_else(|| SecurityError::Missing(account.id.clone()))?;

        let deadline = Utc::now() + ChronoDuration::seconds(REFRESH_MARGIN_SECS);
        if tokens.expires_at > deadline {
            return Ok(tokens.access_token);
        }

        tracing::debug!(account_id = %account.id, "access token near expiry, refreshing");
        self.refresh_oauth(account).await
    }

    /// Exchange the stored refresh token for a fresh access token and persist
    /// the result. Failure surfaces as `CredentialExpired`.
    pub async fn refresh_oauth(&self, account: &Account) -> Result<String, SecurityError> {
        let tokens = self
            .load_tokens(&account.id)?
            .ok_or_else(|| SecurityError::Missing(account.id.clone()))?;
        let refresh_token = tokens
            .refresh_token
            .ok_or(SecurityError::CredentialExpired)?;

        let profile =
            oauth_profile_for(account.provider).ok_or(SecurityError::CredentialExpired)?;
        let workflow = OAuthWorkflow::new(profile)?;

        let refreshed = tokio::time::timeout(REFRESH_DEADLINE, workflow.refresh(&refresh_token))
            .await
            .map_err(|_| SecurityError::CredentialExpired)?
            .map_err(|err| {
                tracing::warn!(account_id = %account.id, error = %err, "oauth refresh failed");
                SecurityError::CredentialExpired
            })?;

        let expires_at = Utc::now()
            + ChronoDuration::seconds(refreshed.expires_in_secs.unwrap_or(3600) as i64);
        let fresh = TokenData {
            access_token: refreshed.access_token.clone(),
            refresh_token: refreshed.refresh_token,
            expires_at,
        };
        self.store_tokens(&account.id, &fresh)?;

        Ok(refreshed.access_token)
    }
}
