use crate::SecurityError;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use skiff_core::Provider;
use url::Url;

const REDIRECT_URI: &str = "http://localhost:3000/callback";

#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub client_id: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    pub scopes: Vec<String>,
}

/// Shipped OAuth endpoints for the providers that support XOAUTH2. Client ids
/// come from the environment so builds never embed deployment secrets.
pub fn oauth_profile_for(provider: Provider) -> Option<OAuthProfile> {
    let (auth_url, token_url, scopes, client_id_env) = match provider {
        Provider::Gmail => (
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            // Full mail scope is required for IMAP access.
            vec!["https://mail.google.com/".to_string()],
            "GOOGLE_CLIENT_ID",
        ),
        Provider::Outlook => (
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            vec![
                "https://outlook.office365.com/IMAP.AccessAsUser.All".to_string(),
                "https://outlook.office365.com/SMTP.Send".to_string(),
                "offline_access".to_string(),
            ],
            "MICROSOFT_CLIENT_ID",
        ),
        Provider::Yahoo | Provider::Custom => return None,
    };

    let client_id = std::env::var(client_id_env).ok()?;
    Some(OAuthProfile {
        client_id,
        auth_url: Url::parse(auth_url).expect("static auth url"),
        token_url: Url::parse(token_url).expect("static token url"),
        redirect_url: Url::parse(REDIRECT_URI).expect("static redirect url"),
        scopes,
    })
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthPkceSession {
    pub authorization_url: String,
    pub csrf_state: String,
    pub pkce_verifier: String,
}

impl std::fmt::Debug for OAuthPkceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthPkceSession")
            .field("authorization_url", &self.authorization_url)
            .field("csrf_state", &"[REDACTED]")
            .field("pkce_verifier", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<u64>,
}

impl std::fmt::Debug for OAuthTokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResult")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OAuthWorkflow {
    profile: OAuthProfile,
}

impl OAuthWorkflow {
    pub fn new(profile: OAuthProfile) -> Result<Self, SecurityError> {
        Self::validate_profile(&profile)?;
        Ok(Self { profile })
    }

    fn validate_profile(profile: &OAuthProfile) -> Result<(), SecurityError> {
        if profile.auth_url.scheme() != "https" || profile.token_url.scheme() != "https" {
            return Err(SecurityError::OAuth(
                "OAuth endpoints must use HTTPS".to_string(),
            ));
        }

        let redirect_host = profile.redirect_url.host_str().unwrap_or("");
        let is_localhost = redirect_host == "127.0.0.1"
            || redirect_host == "localhost"
            || redirect_host == "[::1]";
        if !is_localhost {
            return Err(SecurityError::OAuth(
                "redirect URL must point to localhost for desktop flows".to_string(),
            ));
        }

        if profile.client_id.trim().is_empty() {
            return Err(SecurityError::OAuth("client id is required".to_string()));
        }

        Ok(())
    }

    fn client(
        &self,
    ) -> Result<
        BasicClient<
            oauth2::EndpointSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
        SecurityError,
    > {
        Ok(BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_auth_uri(AuthUrl::new(self.profile.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(self.profile.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(
                self.profile.redirect_url.as_str().to_string(),
            )?))
    }

    fn http_client() -> Result<reqwest::Client, SecurityError> {
        Ok(reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?)
    }

    pub fn begin_pkce_session(&self) -> Result<OAuthPkceSession, SecurityError> {
        let client = self.client()?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);

        for scope in &self.profile.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_state) = auth_request.url();

        Ok(OAuthPkceSession {
            authorization_url: auth_url.to_string(),
            csrf_state: csrf_state.secret().to_string(),
            pkce_verifier: pkce_verifier.secret().to_string(),
        })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<OAuthTokenResult, SecurityError> {
        let client = self.client()?;
        let http_client = Self::http_client()?;

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|err| SecurityError::OAuth(err.to_string()))?;

        Ok(OAuthTokenResult {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token
                .refresh_token()
                .map(|token| token.secret().to_string()),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokenResult, SecurityError> {
        let client = self.client()?;
        let http_client = Self::http_client()?;

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|err| SecurityError::OAuth(err.to_string()))?;

        Ok(OAuthTokenResult {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token
                .refresh_token()
                .map(|token| token.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
        })
    }
}
