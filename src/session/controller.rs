use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;

use crate::audio::{HttpPreviewFetcher, PlaybackController, PlaybackHandle, RodioEngine};
use crate::auth::{AuthPhase, Credential, SpotifyTokenRefresher, TokenLifecycleManager};
use crate::capture::{Camera, CaptureId, CaptureScheduler, Frame, FrameHandler};
use crate::config::Config;
use crate::inference::OpenAiInferenceClient;
use crate::pipeline::{PipelineOrchestrator, RunReport};
use crate::recommend::{RecommendationResolver, SpotifySearch};

use super::{SessionError, SessionEvent, SessionSnapshot, SessionState, SessionStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const EVENT_CAPACITY: usize = 32;

/// The caller-facing session: sign-in state, recording, and one pipeline run
/// per captured frame. Cheap to clone.
#[derive(Clone)]
pub struct MoodSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    auth: TokenLifecycleManager,
    pipeline: PipelineOrchestrator,
    playback: Arc<PlaybackController>,
    scheduler: CaptureScheduler,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    interval: Duration,
    continuous: bool,
}

/// Runs the pipeline for each frame. Holds the session weakly so the capture
/// loop never keeps it alive.
struct RunOnFrame {
    session: Weak<SessionInner>,
}

#[async_trait]
impl FrameHandler for RunOnFrame {
    async fn on_frame(&self, capture: CaptureId, frame: Frame) {
        if let Some(inner) = self.session.upgrade() {
            inner.handle_frame(capture, frame).await;
        }
    }
}

impl MoodSession {
    /// Production wiring: Spotify for auth and search, OpenAI for inference,
    /// rodio for playback.
    pub fn from_config(config: &Config, camera: Arc<dyn Camera>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let auth = TokenLifecycleManager::new(Arc::new(SpotifyTokenRefresher::new(
            client.clone(),
            &config.spotify,
        )));
        let playback = Arc::new(PlaybackController::new(
            Arc::new(HttpPreviewFetcher::new(client.clone())),
            Arc::new(RodioEngine::new(config.volume)),
        ));
        let pipeline = PipelineOrchestrator::new(
            auth.clone(),
            Arc::new(OpenAiInferenceClient::new(client.clone(), &config.inference)),
            RecommendationResolver::new(Arc::new(SpotifySearch::new(client, &config.spotify))),
            Arc::clone(&playback),
        );

        if let Some(seed) = &config.seed {
            auth.sign_in(Credential::from_seed(seed, Utc::now()));
        }

        Ok(Self::from_parts(
            auth,
            pipeline,
            playback,
            CaptureScheduler::new(camera),
            config.capture.interval,
            config.capture.continuous,
        ))
    }

    pub fn from_parts(
        auth: TokenLifecycleManager,
        pipeline: PipelineOrchestrator,
        playback: Arc<PlaybackController>,
        scheduler: CaptureScheduler,
        interval: Duration,
        continuous: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = SessionState::new();
        if auth.is_signed_in() {
            state.signed_in();
        }

        Self {
            inner: Arc::new(SessionInner {
                auth,
                pipeline,
                playback,
                scheduler,
                state: Mutex::new(state),
                events,
                interval,
                continuous,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn auth_phase(&self) -> AuthPhase {
        self.inner.auth.phase()
    }

    /// Installs a credential. Also the only way out of an invalid one.
    pub async fn sign_in(&self, credential: Credential) {
        self.inner.auth.sign_in(credential);
        self.inner.state.lock().await.signed_in();
        let status = self.inner.current_status().await;
        self.inner.emit(SessionEvent::StatusChanged(status));
    }

    /// Stops recording and audio, then drops the credential.
    pub async fn sign_out(&self) {
        self.inner.scheduler.stop().await;
        self.inner.playback.stop().await;
        self.inner.auth.sign_out();
        self.inner.state.lock().await.signed_out();
        self.inner
            .emit(SessionEvent::StatusChanged(SessionStatus::Unauthenticated));
    }

    pub async fn current_status(&self) -> SessionStatus {
        self.inner.current_status().await
    }

    /// Starts periodic capture. `interval` falls back to the configured one.
    pub async fn begin_recording(&self, interval: Option<Duration>) -> Result<(), SessionError> {
        if !self.inner.auth.is_signed_in() {
            return Err(SessionError::NotSignedIn);
        }

        let interval = interval.unwrap_or(self.inner.interval);
        let handler = Arc::new(RunOnFrame {
            session: Arc::downgrade(&self.inner),
        });
        // Held across start so the first frame cannot beat the bookkeeping.
        let mut state = self.inner.state.lock().await;
        let capture = self.inner.scheduler.start(interval, handler).await?;
        state.begin_recording(capture, Utc::now());
        drop(state);

        log_info!("recording; one frame every {}s", interval.as_secs_f32());
        self.inner
            .emit(SessionEvent::StatusChanged(SessionStatus::Recording));
        Ok(())
    }

    /// Stops capture. Idempotent; a run already in flight still completes
    /// and is reported.
    pub async fn end_recording(&self) {
        self.inner.scheduler.stop().await;
        let was_recording = {
            let mut state = self.inner.state.lock().await;
            let was_recording = state.is_recording();
            state.end_recording();
            was_recording
        };
        if was_recording {
            let status = self.inner.current_status().await;
            self.inner.emit(SessionEvent::StatusChanged(status));
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.inner.scheduler.is_active().await
    }

    pub async fn stop_preview(&self) {
        self.inner.playback.stop().await;
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.playback.set_volume(volume);
    }

    pub async fn now_playing(&self) -> Option<PlaybackHandle> {
        self.inner.playback.now_playing().await
    }

    pub async fn last_frame(&self) -> Option<Frame> {
        self.inner.state.lock().await.last_frame.clone()
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.inner.state.lock().await.last_report.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.current_status().await;
        let now_playing = self.inner.playback.now_playing().await;
        let state = self.inner.state.lock().await;
        SessionSnapshot {
            status,
            auth: self.inner.auth.phase(),
            recording_since: state.recording_since,
            runs_completed: state.runs_completed,
            now_playing,
            last_recommendation: state
                .last_report
                .as_ref()
                .and_then(|report| report.outcome.recommendation().cloned()),
        }
    }

    /// Teardown: releases the capture device and silences audio.
    pub async fn shutdown(&self) {
        self.inner.scheduler.stop().await;
        self.inner.playback.stop().await;
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn current_status(&self) -> SessionStatus {
        if !self.auth.is_signed_in() {
            return SessionStatus::Unauthenticated;
        }
        match self.state.lock().await.status.clone() {
            SessionStatus::Unauthenticated => SessionStatus::Ready,
            status => status,
        }
    }

    async fn handle_frame(&self, capture: CaptureId, frame: Frame) {
        {
            let mut state = self.state.lock().await;
            if !(state.owns(capture) && state.is_recording()) {
                log_debug!("dropping frame {} from {capture}; no longer recording", frame.id());
                return;
            }
            state.frame_captured(frame.clone());
        }
        self.emit(SessionEvent::StatusChanged(SessionStatus::AwaitingResult));

        let report = self.pipeline.run(&frame).await;

        // Only ever stop the capture this run came from; a newer recording
        // may have started while the pipeline was busy.
        let keep_recording = self.continuous && report.outcome.is_success();
        if !keep_recording {
            self.scheduler.stop_capture(capture).await;
        }
        let still_recording = keep_recording && self.scheduler.is_current(capture).await;

        let status = {
            let mut state = self.state.lock().await;
            state
                .owns(capture)
                .then(|| state.run_completed(report.clone(), still_recording))
        };
        match &status {
            None => log_info!("run for frame {} settled after {capture} was replaced", report.frame_id),
            Some(SessionStatus::Error(reason)) => log_warn!("run failed: {reason}"),
            Some(SessionStatus::Unauthenticated) => log_warn!("run failed; sign in again"),
            Some(_) => log_info!("run for frame {} settled", report.frame_id),
        }

        self.emit(SessionEvent::RunCompleted(report));
        if let Some(status) = status {
            self.emit(SessionEvent::StatusChanged(status));
        }
    }
}
