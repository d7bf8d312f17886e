use std::fmt;

use chrono::{DateTime, Duration, Utc};
use crate::config::CredentialSeed;

/// Why the stored credential stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialErrorTag {
    RefreshAccessTokenError,
    MissingRefreshToken,
}

/// Token material returned by an authorization or refresh exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// The session's OAuth credential. Never mutated in place: a refresh builds a
/// new value and the store swaps it in whole.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub last_error: Option<CredentialErrorTag>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            refresh_token: refresh_token.into(),
            last_error: None,
        }
    }

    /// First credential of a session. A grant without a refresh token yields a
    /// credential that cannot be renewed once it expires.
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            expires_at: expiry_after(now, grant.expires_in),
            refresh_token: grant.refresh_token.unwrap_or_default(),
            last_error: None,
        }
    }

    /// Credential carried in from an authorization done elsewhere. Without an
    /// access token it starts out expired, so the first use refreshes it.
    pub fn from_seed(seed: &CredentialSeed, now: DateTime<Utc>) -> Self {
        match &seed.access_token {
            Some(access) => Self::new(
                access.expose(),
                expiry_after(now, seed.expires_in.as_secs()),
                seed.refresh_token.expose(),
            ),
            None => Self::new("", now, seed.refresh_token.expose()),
        }
    }

    /// Successor produced by a refresh exchange. The previous refresh token is
    /// reused when the provider does not rotate it.
    pub fn refreshed(&self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            expires_at: expiry_after(now, grant.expires_in),
            refresh_token: grant
                .refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            last_error: None,
        }
    }

    /// Copy of this credential stamped with a failure; tokens are left intact
    /// for diagnostics.
    pub fn with_error(&self, tag: CredentialErrorTag) -> Self {
        Self {
            last_error: Some(tag),
            ..self.clone()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("last_error", &self.last_error)
            .finish()
    }
}

fn expiry_after(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let secs = i64::try_from(expires_in).unwrap_or(i64::MAX);
    now.checked_add_signed(Duration::seconds(secs.min(i64::MAX / 1000)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn redact(token: &str) -> String {
    if token.is_empty() {
        "<none>".into()
    } else {
        format!("***{}", token.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.into(),
            expires_in: 3600,
            refresh_token: refresh.map(String::from),
        }
    }

    #[test]
    fn seed_without_access_token_starts_expired() {
        let now = Utc::now();
        let seed = CredentialSeed {
            refresh_token: Secret::new("r"),
            access_token: None,
            expires_in: std::time::Duration::from_secs(3600),
        };
        let credential = Credential::from_seed(&seed, now);
        assert!(credential.is_expired(now));
        assert!(credential.can_refresh());

        let seed = CredentialSeed {
            access_token: Some(Secret::new("a")),
            ..seed
        };
        let credential = Credential::from_seed(&seed, now);
        assert_eq!(credential.access_token, "a");
        assert_eq!(credential.expires_at, now + Duration::seconds(3600));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let credential = Credential::new("a", now, "r");
        assert!(credential.is_expired(now));
        assert!(!credential.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn from_grant_computes_absolute_expiry() {
        let now = Utc::now();
        let credential = Credential::from_grant(grant("a", Some("r")), now);
        assert_eq!(credential.expires_at, now + Duration::seconds(3600));
        assert_eq!(credential.refresh_token, "r");
        assert!(credential.can_refresh());
    }

    #[test]
    fn refresh_without_rotation_keeps_previous_refresh_token() {
        let now = Utc::now();
        let first = Credential::new("old", now, "keep-me");
        let next = first.refreshed(grant("new", None), now);
        assert_eq!(next.access_token, "new");
        assert_eq!(next.refresh_token, "keep-me");

        let rotated = first.refreshed(grant("new", Some("rotated")), now);
        assert_eq!(rotated.refresh_token, "rotated");
    }

    #[test]
    fn with_error_leaves_tokens_intact() {
        let now = Utc::now();
        let credential = Credential::new("a", now, "r");
        let stamped = credential.with_error(CredentialErrorTag::RefreshAccessTokenError);
        assert_eq!(stamped.access_token, "a");
        assert_eq!(stamped.expires_at, now);
        assert_eq!(stamped.last_error, Some(CredentialErrorTag::RefreshAccessTokenError));
    }

    #[test]
    fn debug_output_hides_tokens() {
        let credential = Credential::new("super-secret-access", Utc::now(), "super-secret-refresh");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
