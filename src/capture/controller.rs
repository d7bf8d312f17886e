use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use log::info;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{
    loop_worker::{capture_loop, release},
    Camera, CaptureDevice, Frame,
};

pub(super) type DeviceSlot = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

/// Identifies one start..stop span of the scheduler. A new `start` always
/// gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(u64);

#[cfg(test)]
impl CaptureId {
    pub(crate) fn fixture(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture #{}", self.0)
    }
}

/// Receives each captured frame, tagged with the capture it came from. The
/// next tick waits for this to return.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, capture: CaptureId, frame: Frame);
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture is already running")]
    AlreadyActive,
    #[error("capture interval must be greater than zero")]
    InvalidInterval,
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

struct CaptureSession {
    id: CaptureId,
    cancel_token: CancellationToken,
    device: DeviceSlot,
    task: JoinHandle<()>,
}

impl CaptureSession {
    fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.task.is_finished()
    }
}

/// Periodic, cancellable capture. Owns the capture device for as long as a
/// session runs.
pub struct CaptureScheduler {
    camera: Arc<dyn Camera>,
    session: Mutex<Option<CaptureSession>>,
    next_id: AtomicU64,
}

impl CaptureScheduler {
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self {
            camera,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn start(
        &self,
        interval: Duration,
        on_frame: Arc<dyn FrameHandler>,
    ) -> Result<CaptureId, CaptureError> {
        if interval.is_zero() {
            return Err(CaptureError::InvalidInterval);
        }

        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(CaptureSession::is_active) {
            return Err(CaptureError::AlreadyActive);
        }
        // A finished session may still hold its device if nobody called stop.
        if let Some(previous) = session.take() {
            previous.cancel_token.cancel();
            release(&previous.device).await;
        }

        let device = self
            .camera
            .open()
            .await
            .context("failed to acquire capture device")?;

        let id = CaptureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = CancellationToken::new();
        let device: DeviceSlot = Arc::new(Mutex::new(Some(device)));
        let task = tokio::spawn(capture_loop(
            id,
            Arc::clone(&device),
            on_frame,
            interval,
            cancel_token.clone(),
        ));

        info!("{id} started; one frame every {}s", interval.as_secs_f32());
        *session = Some(CaptureSession {
            id,
            cancel_token,
            device,
            task,
        });
        Ok(id)
    }

    /// Cancels the timer and releases the device. Idempotent, and safe to call
    /// from inside a frame handler: it never waits on the loop task itself.
    pub async fn stop(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        session.cancel_token.cancel();
        release(&session.device).await;
        info!("{} stopped", session.id);
    }

    /// Like `stop`, but only if `id` is still the current capture. Returns
    /// whether anything was stopped.
    pub async fn stop_capture(&self, id: CaptureId) -> bool {
        let session = {
            let mut current = self.session.lock().await;
            if current.as_ref().map(|s| s.id) != Some(id) {
                return false;
            }
            current.take()
        };
        let Some(session) = session else {
            return false;
        };

        session.cancel_token.cancel();
        release(&session.device).await;
        info!("{id} stopped after its run");
        true
    }

    pub async fn is_active(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(CaptureSession::is_active)
    }

    /// True while `id` is the running capture.
    pub async fn is_current(&self, id: CaptureId) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.id == id && s.is_active())
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };

        session.cancel_token.cancel();
        session.task.abort();
        // If a capture holds the slot right now, the aborted task drops the
        // last reference to the device instead.
        let released = session.device.try_lock().ok().and_then(|mut slot| slot.take());
        drop(released);
    }
}
