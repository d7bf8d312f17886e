use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use super::{AuthError, Credential};

pub(crate) type RefreshOutcome = Result<Arc<Credential>, AuthError>;

/// Coarse lifecycle phase, for status reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthPhase {
    Unauthenticated,
    Valid,
    Refreshing,
    Invalid,
}

pub(crate) enum AuthState {
    Unauthenticated,
    Valid(Arc<Credential>),
    /// A refresh exchange is in flight for `stale`. Every caller that needs a
    /// credential meanwhile waits on `outcome`.
    Refreshing {
        stale: Arc<Credential>,
        outcome: watch::Receiver<Option<RefreshOutcome>>,
    },
    /// Terminal until the next sign-in. `error` is handed back unchanged to
    /// every later caller.
    Invalid {
        credential: Arc<Credential>,
        error: AuthError,
    },
}

impl AuthState {
    fn phase(&self) -> AuthPhase {
        match self {
            AuthState::Unauthenticated => AuthPhase::Unauthenticated,
            AuthState::Valid(_) => AuthPhase::Valid,
            AuthState::Refreshing { .. } => AuthPhase::Refreshing,
            AuthState::Invalid { .. } => AuthPhase::Invalid,
        }
    }
}

/// Sole owner of the session credential. Other components only ever see
/// `Arc<Credential>` snapshots.
pub struct TokenStore {
    state: Mutex<AuthState>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AuthState::Unauthenticated),
        }
    }

    /// The current credential, including a stale or invalidated one.
    pub fn get(&self) -> Option<Arc<Credential>> {
        match &*self.lock() {
            AuthState::Unauthenticated => None,
            AuthState::Valid(credential) => Some(Arc::clone(credential)),
            AuthState::Refreshing { stale, .. } => Some(Arc::clone(stale)),
            AuthState::Invalid { credential, .. } => Some(Arc::clone(credential)),
        }
    }

    pub fn phase(&self) -> AuthPhase {
        self.lock().phase()
    }

    /// Installs a credential, leaving whatever state came before.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        *self.lock() = AuthState::Valid(Arc::clone(&credential));
        credential
    }

    /// Marks `credential` unusable. Later callers get `error` back unchanged.
    pub fn invalidate(&self, credential: Credential, error: AuthError) {
        *self.lock() = AuthState::Invalid {
            credential: Arc::new(credential),
            error,
        };
    }

    pub fn clear(&self) {
        *self.lock() = AuthState::Unauthenticated;
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
