#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moodplay_lib::audio::{AudioEngine, PlaybackController, PlaybackError, PreviewFetcher};
use moodplay_lib::auth::{Credential, SpotifyTokenRefresher, TokenLifecycleManager};
use moodplay_lib::capture::{Camera, CaptureDevice, CaptureScheduler, Frame};
use moodplay_lib::config::{InferenceConfig, Secret, SpotifyConfig};
use moodplay_lib::inference::OpenAiInferenceClient;
use moodplay_lib::pipeline::{PipelineOrchestrator, RunReport};
use moodplay_lib::recommend::{RecommendationResolver, SpotifySearch};
use moodplay_lib::session::{MoodSession, SessionEvent, SessionStatus};

/// `base64("client:secret")`
pub const BASIC_AUTH: &str = "Basic Y2xpZW50OnNlY3JldA==";

pub fn spotify_config(server: &MockServer) -> SpotifyConfig {
    SpotifyConfig {
        client_id: "client".into(),
        client_secret: Secret::new("secret"),
        token_url: format!("{}/api/token", server.uri()),
        api_base: server.uri(),
        search_limit: 5,
    }
}

pub fn inference_config(server: &MockServer) -> InferenceConfig {
    InferenceConfig {
        api_key: Secret::new("sk-test"),
        api_base: server.uri(),
        model: "gpt-4o".into(),
    }
}

pub fn live_credential() -> Credential {
    Credential::new("live-token", Utc::now() + chrono::Duration::hours(1), "refresh-1")
}

pub fn expired_credential() -> Credential {
    Credential::new("stale-token", Utc::now() - chrono::Duration::seconds(1), "refresh-1")
}

pub fn jpeg_frame() -> Frame {
    Frame::from_jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9])
}

pub fn track_json(id: &str, name: &str, preview: Option<&str>) -> Value {
    json!({
        "id": id,
        "name": name,
        "artists": [{"name": "Test Artist"}],
        "preview_url": preview,
        "uri": format!("spotify:track:{id}"),
    })
}

pub async fn mount_inference(server: &MockServer, suggestion: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": suggestion}}]
        })))
        .mount(server)
        .await;
}

/// Like `mount_inference`, but every answer takes `delay`.
pub async fn mount_slow_inference(server: &MockServer, suggestion: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "choices": [{"message": {"role": "assistant", "content": suggestion}}]
                }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

pub async fn mount_search(server: &MockServer, items: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks": {"items": items}
        })))
        .mount(server)
        .await;
}

#[derive(Default)]
pub struct DeviceCounters {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub captured: AtomicUsize,
}

impl DeviceCounters {
    pub fn held(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeCamera {
    pub counters: Arc<DeviceCounters>,
}

struct FakeDevice {
    counters: Arc<DeviceCounters>,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn open(&self) -> anyhow::Result<Box<dyn CaptureDevice>> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[async_trait]
impl CaptureDevice for FakeDevice {
    async fn capture(&mut self) -> anyhow::Result<Frame> {
        self.counters.captured.fetch_add(1, Ordering::SeqCst);
        Ok(jpeg_frame())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records how many previews would be audible at once.
#[derive(Default)]
pub struct FakeEngine {
    pub plays: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

#[async_trait]
impl AudioEngine for FakeEngine {
    async fn play(&self, _audio: Vec<u8>) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(0, Ordering::SeqCst);
    }

    fn set_volume(&self, _volume: f32) {}
}

pub struct FakeFetcher;

#[async_trait]
impl PreviewFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, PlaybackError> {
        Ok(vec![0u8; 32])
    }
}

pub struct TestSession {
    pub session: MoodSession,
    pub auth: TokenLifecycleManager,
    pub engine: Arc<FakeEngine>,
    pub camera: Arc<FakeCamera>,
}

/// A session wired to `server` for every remote call, with fake capture and
/// audio devices. Frames arrive every 50 ms while recording.
pub fn session_with(server: &MockServer, continuous: bool) -> TestSession {
    let client = reqwest::Client::new();
    let spotify = spotify_config(server);

    let auth = TokenLifecycleManager::new(Arc::new(SpotifyTokenRefresher::new(
        client.clone(),
        &spotify,
    )));
    let engine = Arc::new(FakeEngine::default());
    let playback = Arc::new(PlaybackController::new(Arc::new(FakeFetcher), engine.clone()));
    let pipeline = PipelineOrchestrator::new(
        auth.clone(),
        Arc::new(OpenAiInferenceClient::new(client.clone(), &inference_config(server))),
        RecommendationResolver::new(Arc::new(SpotifySearch::new(client, &spotify))),
        Arc::clone(&playback),
    );
    let camera = Arc::new(FakeCamera::default());

    let session = MoodSession::from_parts(
        auth.clone(),
        pipeline,
        playback,
        CaptureScheduler::new(camera.clone()),
        Duration::from_millis(50),
        continuous,
    );

    TestSession {
        session,
        auth,
        engine,
        camera,
    }
}

pub async fn next_run(events: &mut broadcast::Receiver<SessionEvent>) -> RunReport {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::RunCompleted(report)) => return report,
                Ok(_) => continue,
                Err(err) => panic!("event stream broke: {err}"),
            }
        }
    })
    .await
    .expect("no pipeline run completed in time")
}

pub async fn wait_for_status(events: &mut broadcast::Receiver<SessionEvent>, want: SessionStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StatusChanged(status)) if status == want => return,
                Ok(_) => continue,
                Err(err) => panic!("event stream broke: {err}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reported {want:?}"))
}
