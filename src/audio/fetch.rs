use async_trait::async_trait;

use super::PlaybackError;

/// Downloads preview audio. Preview URLs are pre-signed, so no credential is
/// attached.
#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError>;
}

pub struct HttpPreviewFetcher {
    client: reqwest::Client,
}

impl HttpPreviewFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PreviewFetcher for HttpPreviewFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| PlaybackError::Fetch(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Fetch(format!("status {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PlaybackError::Fetch(err.to_string()))?;
        if bytes.is_empty() {
            return Err(PlaybackError::Fetch("empty body".into()));
        }
        Ok(bytes.to_vec())
    }
}
