use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::watch;

use super::store::{AuthState, RefreshOutcome};
use super::{
    AuthError, AuthPhase, Credential, CredentialErrorTag, RefreshFailure, TokenGrant,
    TokenRefresher, TokenStore,
};

enum Pending {
    Join(watch::Receiver<Option<RefreshOutcome>>),
    Start(Arc<Credential>),
}

/// Hands out usable credentials, refreshing an expired one first.
///
/// At most one refresh exchange is in flight: callers arriving while it runs
/// wait for that same outcome. Refresh tokens may be single use on the
/// provider side, so a second exchange could invalidate the first.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenLifecycleManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store: Arc::new(TokenStore::new()),
            refresher,
        }
    }

    /// Unauthenticated (or Invalid) to Valid. Also the way out of Invalid.
    pub fn sign_in(&self, credential: Credential) -> Arc<Credential> {
        info!("signed in; access token valid until {}", credential.expires_at);
        self.store.replace(credential)
    }

    pub fn sign_in_with_grant(&self, grant: TokenGrant) -> Arc<Credential> {
        self.sign_in(Credential::from_grant(grant, Utc::now()))
    }

    pub fn sign_out(&self) {
        info!("signed out; credential dropped");
        self.store.clear();
    }

    pub fn phase(&self) -> AuthPhase {
        self.store.phase()
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.phase(), AuthPhase::Valid | AuthPhase::Refreshing)
    }

    /// Last known credential, stale or invalid ones included.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.store.get()
    }

    /// A credential that is not expired right now.
    pub async fn ensure_valid(&self) -> RefreshOutcome {
        self.acquire(None).await
    }

    /// Called after a service rejected `rejected`. Refreshes unless the store
    /// already moved on to a different credential.
    pub async fn force_refresh(&self, rejected: &Credential) -> RefreshOutcome {
        self.acquire(Some(rejected)).await
    }

    /// A service rejected `rejected` even after a refresh. Moves the store to
    /// Invalid if that credential is still current, and returns the error.
    pub fn mark_rejected(&self, rejected: &Credential, reason: &str) -> AuthError {
        let error = AuthError::Expired(reason.to_string());
        let mut state = self.store.lock();
        let still_current = match &*state {
            AuthState::Valid(current) if current.access_token == rejected.access_token => {
                Some(Arc::clone(current))
            }
            _ => None,
        };
        if let Some(credential) = still_current {
            warn!("credential rejected after refresh: {reason}");
            *state = AuthState::Invalid {
                credential,
                error: error.clone(),
            };
        }
        error
    }

    async fn acquire(&self, rejected: Option<&Credential>) -> RefreshOutcome {
        let receiver = {
            let mut state = self.store.lock();
            let pending = match &*state {
                AuthState::Unauthenticated => return Err(AuthError::Unauthenticated),
                AuthState::Invalid { error, .. } => return Err(error.clone()),
                AuthState::Refreshing { outcome, .. } => Pending::Join(outcome.clone()),
                AuthState::Valid(current) => {
                    let needs_refresh = match rejected {
                        Some(rejected) => rejected.access_token == current.access_token,
                        None => current.is_expired(Utc::now()),
                    };
                    if !needs_refresh {
                        return Ok(Arc::clone(current));
                    }
                    Pending::Start(Arc::clone(current))
                }
            };

            match pending {
                Pending::Join(receiver) => receiver,
                Pending::Start(stale) => self.start_refresh(&mut state, stale)?,
            }
        };

        wait_for_outcome(receiver).await
    }

    fn start_refresh(
        &self,
        state: &mut AuthState,
        stale: Arc<Credential>,
    ) -> Result<watch::Receiver<Option<RefreshOutcome>>, AuthError> {
        if !stale.can_refresh() {
            let error = AuthError::Expired("no refresh token on the credential".into());
            warn!("access token expired and no refresh token is available");
            *state = AuthState::Invalid {
                credential: Arc::new(stale.with_error(CredentialErrorTag::MissingRefreshToken)),
                error: error.clone(),
            };
            return Err(error);
        }

        let (tx, rx) = watch::channel(None);
        *state = AuthState::Refreshing {
            stale: Arc::clone(&stale),
            outcome: rx.clone(),
        };

        info!("access token expired at {}; refreshing", stale.expires_at);

        // Runs detached so that a caller giving up does not strand the others.
        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        tokio::spawn(async move {
            let result = refresher.refresh(&stale.refresh_token).await;
            let outcome = complete_refresh(&store, &stale, result);
            let _ = tx.send(Some(outcome));
        });

        Ok(rx)
    }
}

fn complete_refresh(
    store: &TokenStore,
    stale: &Arc<Credential>,
    result: Result<TokenGrant, RefreshFailure>,
) -> RefreshOutcome {
    let mut state = store.lock();

    let still_pending = matches!(
        &*state,
        AuthState::Refreshing { stale: pending, .. } if Arc::ptr_eq(pending, stale)
    );
    if !still_pending {
        warn!("discarding refresh result; the session changed while it was in flight");
        return Err(AuthError::RefreshAborted);
    }

    match result {
        Ok(grant) => {
            let fresh = Arc::new(stale.refreshed(grant, Utc::now()));
            info!("access token refreshed; valid until {}", fresh.expires_at);
            *state = AuthState::Valid(Arc::clone(&fresh));
            Ok(fresh)
        }
        Err(failure) => {
            warn!("access token refresh failed: {failure}");
            let error = AuthError::Refresh(failure);
            *state = AuthState::Invalid {
                credential: Arc::new(stale.with_error(CredentialErrorTag::RefreshAccessTokenError)),
                error: error.clone(),
            };
            Err(error)
        }
    }
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Option<RefreshOutcome>>) -> RefreshOutcome {
    let settled = receiver
        .wait_for(Option::is_some)
        .await
        .map_err(|_| AuthError::RefreshAborted)?;
    let outcome: Option<RefreshOutcome> = settled.clone();
    outcome.unwrap_or(Err(AuthError::RefreshAborted))
}
