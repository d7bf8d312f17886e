pub mod controller;
pub mod state;

pub use controller::MoodSession;
pub use state::{SessionSnapshot, SessionState, SessionStatus};

use thiserror::Error;

use crate::capture::CaptureError;
use crate::pipeline::RunReport;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    /// One per pipeline run, success or failure.
    RunCompleted(RunReport),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sign in before recording")]
    NotSignedIn,
    #[error("already recording")]
    AlreadyRecording,
    #[error(transparent)]
    Capture(CaptureError),
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::AlreadyActive => SessionError::AlreadyRecording,
            other => SessionError::Capture(other),
        }
    }
}
