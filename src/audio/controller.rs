use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::{AudioEngine, PlaybackError, PreviewFetcher};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// The preview currently owned by the controller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackHandle {
    pub preview_url: String,
    pub started_at: DateTime<Utc>,
}

/// Owns the single playback resource. Starting a preview always stops the
/// previous one first; the lock is held across fetch and start so two
/// concurrent `play` calls cannot both end up audible.
pub struct PlaybackController {
    fetcher: Arc<dyn PreviewFetcher>,
    engine: Arc<dyn AudioEngine>,
    current: Mutex<Option<PlaybackHandle>>,
}

impl PlaybackController {
    pub fn new(fetcher: Arc<dyn PreviewFetcher>, engine: Arc<dyn AudioEngine>) -> Self {
        Self {
            fetcher,
            engine,
            current: Mutex::new(None),
        }
    }

    pub async fn play(&self, preview_url: &str) -> Result<(), PlaybackError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            log_debug!("stopping preview {} before starting another", previous.preview_url);
            self.engine.stop();
        }

        let audio = self.fetcher.fetch(preview_url).await?;
        log_debug!("fetched {} bytes from {preview_url}", audio.len());
        self.engine.play(audio).await?;

        log_info!("playing preview {preview_url}");
        *current = Some(PlaybackHandle {
            preview_url: preview_url.to_string(),
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Stops whatever is playing. Safe to call when idle.
    pub async fn stop(&self) {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            log_info!("stopped preview {}", previous.preview_url);
        }
        self.engine.stop();
    }

    pub async fn now_playing(&self) -> Option<PlaybackHandle> {
        self.current.lock().await.clone()
    }

    pub fn set_volume(&self, volume: f32) {
        self.engine.set_volume(volume.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Tracks how many sinks would be audible at once.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
        pub plays: AtomicUsize,
        pub stops: AtomicUsize,
        pub volume: StdMutex<Option<f32>>,
        pub reject: StdMutex<Option<PlaybackError>>,
    }

    #[async_trait]
    impl AudioEngine for FakeEngine {
        async fn play(&self, _audio: Vec<u8>) -> Result<(), PlaybackError> {
            if let Some(err) = self.reject.lock().unwrap().clone() {
                return Err(err);
            }
            tokio::task::yield_now().await;
            self.plays.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.active.store(0, Ordering::SeqCst);
        }

        fn set_volume(&self, volume: f32) {
            *self.volume.lock().unwrap() = Some(volume);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub fail: bool,
        pub fetched: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl PreviewFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
            self.fetched.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(PlaybackError::Fetch("status 404".into()));
            }
            Ok(vec![0u8; 16])
        }
    }

    fn controller(fail_fetch: bool) -> (Arc<PlaybackController>, Arc<FakeEngine>) {
        let engine = Arc::new(FakeEngine::default());
        let fetcher = Arc::new(FakeFetcher {
            fail: fail_fetch,
            ..Default::default()
        });
        (Arc::new(PlaybackController::new(fetcher, engine.clone())), engine)
    }

    #[tokio::test]
    async fn second_play_replaces_the_first() {
        let (controller, engine) = controller(false);

        controller.play("https://p.scdn.co/a").await.unwrap();
        controller.play("https://p.scdn.co/b").await.unwrap();

        assert_eq!(engine.plays.load(Ordering::SeqCst), 2);
        assert_eq!(engine.active.load(Ordering::SeqCst), 1);
        assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
        let playing = controller.now_playing().await.unwrap();
        assert_eq!(playing.preview_url, "https://p.scdn.co/b");
    }

    #[tokio::test]
    async fn concurrent_plays_never_overlap() {
        let (controller, engine) = controller(false);

        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller.play(&format!("https://p.scdn.co/{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.plays.load(Ordering::SeqCst), 8);
        assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (controller, engine) = controller(false);

        controller.stop().await;
        controller.play("https://p.scdn.co/a").await.unwrap();
        controller.stop().await;
        controller.stop().await;

        assert_eq!(engine.active.load(Ordering::SeqCst), 0);
        assert!(controller.now_playing().await.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_nothing_playing() {
        let (controller, engine) = controller(true);

        let err = controller.play("https://p.scdn.co/gone").await.unwrap_err();

        assert!(matches!(err, PlaybackError::Fetch(_)));
        assert_eq!(engine.plays.load(Ordering::SeqCst), 0);
        assert!(controller.now_playing().await.is_none());
    }

    #[tokio::test]
    async fn decode_failure_is_reported() {
        let (controller, engine) = controller(false);
        controller.play("https://p.scdn.co/a").await.unwrap();
        *engine.reject.lock().unwrap() = Some(PlaybackError::Decode("not audio".into()));

        let err = controller.play("https://p.scdn.co/b").await.unwrap_err();

        assert_eq!(err, PlaybackError::Decode("not audio".into()));
        assert_eq!(engine.active.load(Ordering::SeqCst), 0, "previous preview was stopped first");
        assert!(controller.now_playing().await.is_none());
    }

    #[test]
    fn volume_is_clamped() {
        let (controller, engine) = controller(false);
        controller.set_volume(1.7);
        assert_eq!(*engine.volume.lock().unwrap(), Some(1.0));
    }
}
