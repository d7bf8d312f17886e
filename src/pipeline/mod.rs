pub mod orchestrator;

pub use orchestrator::PipelineOrchestrator;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::inference::InferenceError;
use crate::recommend::{Recommendation, SearchError};

/// Terminal failure of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl PipelineError {
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, PipelineError::Auth(err) if err.requires_sign_in())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewStatus {
    Playing,
    /// The track has no preview clip.
    Unavailable,
    /// Playback failed. Logged only; the run still succeeded.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Resolved {
        recommendation: Recommendation,
        preview: PreviewStatus,
    },
    NoMatch {
        recommendation: Recommendation,
    },
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed(_))
    }

    pub fn recommendation(&self) -> Option<&Recommendation> {
        match self {
            RunOutcome::Resolved { recommendation, .. } | RunOutcome::NoMatch { recommendation } => {
                Some(recommendation)
            }
            RunOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            RunOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub frame_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}
