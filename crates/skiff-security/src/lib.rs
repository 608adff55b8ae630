mod callback;
mod credentials;
mod error;
mod keychain;
mod oauth;

pub use callback::{CallbackParams, CallbackServer};
pub use credentials::{CredentialStore, SecretKind, TokenData};
pub use error::SecurityError;
pub use keychain::{SecretKey, SecretStore};
pub use oauth::{
    oauth_profile_for, OAuthPkceSession, OAuthProfile, OAuthTokenResult, OAuthWorkflow,
};
