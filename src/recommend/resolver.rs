use std::sync::Arc;

use log::debug;

use crate::auth::Credential;

use super::{Recommendation, SearchError, TrackSearch};

/// Maps a suggestion to a playable track. The first candidate in service
/// order wins; no further ranking is applied.
#[derive(Clone)]
pub struct RecommendationResolver {
    search: Arc<dyn TrackSearch>,
}

impl RecommendationResolver {
    pub fn new(search: Arc<dyn TrackSearch>) -> Self {
        Self { search }
    }

    pub async fn resolve(
        &self,
        suggestion: &str,
        credential: &Credential,
    ) -> Result<Recommendation, SearchError> {
        let candidates = self
            .search
            .search_tracks(suggestion, &credential.access_token)
            .await?;
        debug!("search for {suggestion:?} returned {} candidates", candidates.len());

        Ok(Recommendation {
            suggestion_text: suggestion.to_string(),
            resolved_track: candidates.into_iter().next(),
        })
    }
}
