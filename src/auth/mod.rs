pub mod credential;
pub mod manager;
pub mod refresher;
pub mod store;

pub use credential::{Credential, CredentialErrorTag, TokenGrant};
pub use manager::TokenLifecycleManager;
pub use refresher::{SpotifyTokenRefresher, TokenRefresher};
pub use store::{AuthPhase, TokenStore};

use thiserror::Error;

/// Why a refresh exchange did not produce a new credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint answered with status {0}")]
    Status(u16),
    #[error("token endpoint returned an unusable body: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("not signed in")]
    Unauthenticated,
    /// The credential is unusable and cannot be renewed here; sign in again.
    #[error("access token expired and cannot be renewed ({0}); sign in again")]
    Expired(String),
    /// The refresh exchange failed. Terminal for the current credential.
    #[error("access token refresh failed: {0}")]
    Refresh(RefreshFailure),
    #[error("access token refresh was abandoned before it completed")]
    RefreshAborted,
}

impl AuthError {
    /// Errors after which only a new sign-in helps.
    pub fn requires_sign_in(&self) -> bool {
        !matches!(self, AuthError::RefreshAborted)
    }
}
