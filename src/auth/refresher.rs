use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::{Secret, SpotifyConfig};

use super::{RefreshFailure, TokenGrant};

/// Exchanges a refresh token for fresh token material.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshFailure>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// `grant_type=refresh_token` against the Spotify accounts service, with the
/// client credentials in a basic authorization header.
pub struct SpotifyTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Secret,
}

impl SpotifyTokenRefresher {
    pub fn new(client: reqwest::Client, config: &SpotifyConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenRefresher for SpotifyTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshFailure> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose()))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|err| RefreshFailure::Transport(err.to_string()))?;

        // Anything but 200 is a hard failure, including other 2xx codes.
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RefreshFailure::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| RefreshFailure::Malformed(err.to_string()))?;

        if body.access_token.is_empty() {
            return Err(RefreshFailure::Malformed("empty access_token".into()));
        }

        Ok(TokenGrant {
            access_token: body.access_token,
            expires_in: body.expires_in,
            refresh_token: body.refresh_token,
        })
    }
}
