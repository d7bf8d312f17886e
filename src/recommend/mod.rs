pub mod resolver;
pub mod search;

pub use resolver::RecommendationResolver;
pub use search::SpotifySearch;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub display_name: String,
    pub preview_url: Option<String>,
    pub uri: Option<String>,
}

/// What a pipeline run settled on. `resolved_track` is `None` when the search
/// found nothing, which is a normal outcome.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub suggestion_text: String,
    pub resolved_track: Option<Track>,
}

impl Recommendation {
    pub fn preview_url(&self) -> Option<&str> {
        self.resolved_track
            .as_ref()
            .and_then(|track| track.preview_url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// The access token was rejected. Distinct from "no match" so the caller
    /// can refresh and retry.
    #[error("search service rejected the access token")]
    Unauthorized,
    #[error("search service unreachable: {0}")]
    Transport(String),
    #[error("search service answered with status {0}")]
    Status(u16),
    #[error("search service returned an unusable body: {0}")]
    Malformed(String),
}

/// Free-text track search, results in service order.
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search_tracks(&self, query: &str, access_token: &str)
        -> Result<Vec<Track>, SearchError>;
}
