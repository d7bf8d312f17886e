use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audio::PlaybackHandle;
use crate::auth::AuthPhase;
use crate::capture::{CaptureId, Frame};
use crate::pipeline::{RunOutcome, RunReport};
use crate::recommend::Recommendation;

/// What the caller sees of the session.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Unauthenticated,
    Ready,
    Recording,
    AwaitingResult,
    Error(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Unauthenticated => f.write_str("signed out"),
            SessionStatus::Ready => f.write_str("ready"),
            SessionStatus::Recording => f.write_str("recording"),
            SessionStatus::AwaitingResult => f.write_str("waiting for a recommendation"),
            SessionStatus::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Point-in-time view of the session, printed by `status --json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub auth: AuthPhase,
    pub recording_since: Option<DateTime<Utc>>,
    pub runs_completed: u64,
    pub now_playing: Option<PlaybackHandle>,
    pub last_recommendation: Option<Recommendation>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub recording_since: Option<DateTime<Utc>>,
    /// The capture whose runs this state accepts. Kept after `end_recording`
    /// so a run already in flight is still reported.
    pub capture: Option<CaptureId>,
    pub runs_completed: u64,
    /// Most recent frame, kept for display only.
    pub last_frame: Option<Frame>,
    pub last_report: Option<RunReport>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Recording | SessionStatus::AwaitingResult
        )
    }

    pub fn signed_in(&mut self) {
        if !self.is_recording() {
            self.status = SessionStatus::Ready;
        }
    }

    pub fn signed_out(&mut self) {
        *self = Self::default();
    }

    pub fn begin_recording(&mut self, capture: CaptureId, now: DateTime<Utc>) {
        self.status = SessionStatus::Recording;
        self.recording_since = Some(now);
        self.capture = Some(capture);
    }

    pub fn owns(&self, capture: CaptureId) -> bool {
        self.capture == Some(capture)
    }

    pub fn end_recording(&mut self) {
        if self.is_recording() {
            self.status = SessionStatus::Ready;
        }
        self.recording_since = None;
    }

    pub fn frame_captured(&mut self, frame: Frame) {
        self.status = SessionStatus::AwaitingResult;
        self.last_frame = Some(frame);
    }

    /// Settles a run. `still_recording` says whether capture continues after it.
    pub fn run_completed(&mut self, report: RunReport, still_recording: bool) -> SessionStatus {
        self.status = match &report.outcome {
            RunOutcome::Failed(err) if err.requires_sign_in() => SessionStatus::Unauthenticated,
            RunOutcome::Failed(err) => SessionStatus::Error(err.to_string()),
            _ if still_recording => SessionStatus::Recording,
            _ => SessionStatus::Ready,
        };
        if !still_recording {
            self.recording_since = None;
        }
        self.runs_completed += 1;
        self.last_report = Some(report);
        self.status.clone()
    }
}
