use std::sync::Arc;

use chrono::Utc;

use crate::audio::PlaybackController;
use crate::auth::{Credential, TokenLifecycleManager};
use crate::capture::Frame;
use crate::inference::InferenceClient;
use crate::recommend::{Recommendation, RecommendationResolver, SearchError};

use super::{PipelineError, PreviewStatus, RunOutcome, RunReport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// One capture, infer, resolve, play cycle per frame.
///
/// Stages run strictly in order and the first failure ends the run, so audio
/// is never started for a frame whose earlier stages failed.
pub struct PipelineOrchestrator {
    auth: TokenLifecycleManager,
    inference: Arc<dyn InferenceClient>,
    resolver: RecommendationResolver,
    playback: Arc<PlaybackController>,
}

impl PipelineOrchestrator {
    pub fn new(
        auth: TokenLifecycleManager,
        inference: Arc<dyn InferenceClient>,
        resolver: RecommendationResolver,
        playback: Arc<PlaybackController>,
    ) -> Self {
        Self {
            auth,
            inference,
            resolver,
            playback,
        }
    }

    pub async fn run(&self, frame: &Frame) -> RunReport {
        let started_at = Utc::now();
        let outcome = match self.execute(frame).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log_error!("run for frame {} failed: {err}", frame.id());
                RunOutcome::Failed(err)
            }
        };

        RunReport {
            frame_id: frame.id(),
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    async fn execute(&self, frame: &Frame) -> Result<RunOutcome, PipelineError> {
        let credential = self.auth.ensure_valid().await?;

        let suggestion = self.inference.suggest(frame).await?;
        log_info!("frame {}: suggestion {suggestion:?}", frame.id());

        let recommendation = self.resolve(&suggestion, credential).await?;
        let Some(track) = recommendation.resolved_track.as_ref() else {
            log_info!("no track found for {suggestion:?}");
            return Ok(RunOutcome::NoMatch { recommendation });
        };
        log_info!("resolved {suggestion:?} to {}", track.display_name);

        let preview = match recommendation.preview_url() {
            None => {
                log_info!("{} has no preview clip", track.display_name);
                PreviewStatus::Unavailable
            }
            Some(url) => match self.playback.play(url).await {
                Ok(()) => PreviewStatus::Playing,
                Err(err) => {
                    log_warn!("preview playback failed: {err}");
                    PreviewStatus::Failed(err.to_string())
                }
            },
        };

        Ok(RunOutcome::Resolved {
            recommendation,
            preview,
        })
    }

    /// Search with one forced refresh and retry if the token is rejected.
    async fn resolve(
        &self,
        suggestion: &str,
        credential: Arc<Credential>,
    ) -> Result<Recommendation, PipelineError> {
        match self.resolver.resolve(suggestion, &credential).await {
            Err(SearchError::Unauthorized) => {}
            other => return Ok(other?),
        }

        log_warn!("search rejected the access token; refreshing once");
        let renewed = self.auth.force_refresh(&credential).await?;
        match self.resolver.resolve(suggestion, &renewed).await {
            Err(SearchError::Unauthorized) => Err(self
                .auth
                .mark_rejected(&renewed, "search service rejected a refreshed token")
                .into()),
            other => Ok(other?),
        }
    }
}
