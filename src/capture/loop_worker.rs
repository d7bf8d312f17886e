use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{controller::DeviceSlot, CaptureId, Frame, FrameHandler};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const CAPTURE_TIMEOUT_SECS: u64 = 10;

/// Captures a frame every `period` and hands it to `on_frame`, one tick at a
/// time. The handler's run is awaited before the next tick is considered, so
/// runs never overlap. Exits on cancellation or when the device slot has been
/// emptied, and always leaves the device released.
pub(super) async fn capture_loop(
    id: CaptureId,
    device: DeviceSlot,
    on_frame: Arc<dyn FrameHandler>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    // First capture one full period after start, like a plain interval timer.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick += 1;
                let Some(captured) = capture_once(&device, tick).await else {
                    log_info!("capture device gone; leaving capture loop");
                    break;
                };

                match captured {
                    // Stopped while the device was busy; the frame belongs to nobody.
                    Ok(_) if cancel_token.is_cancelled() => {}
                    Ok(frame) => {
                        log_info!("{id} tick {tick}: captured frame {} ({} bytes)", frame.id(), frame.len());
                        on_frame.on_frame(id, frame).await;
                    }
                    Err(err) => log_error!("tick {tick}: capture failed: {err:#}"),
                }

                if cancel_token.is_cancelled() {
                    log_info!("capture stopped after tick {tick}");
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down");
                break;
            }
        }
    }

    cancel_token.cancel();
    release(&device).await;
}

async fn capture_once(device: &DeviceSlot, tick: u64) -> Option<Result<Frame>> {
    let mut slot = device.lock().await;
    let device = slot.as_mut()?;

    let started = Instant::now();
    let result = match time::timeout(Duration::from_secs(CAPTURE_TIMEOUT_SECS), device.capture()).await {
        Ok(result) => result,
        Err(_) => {
            log_warn!("tick {tick}: capture timeout (> {CAPTURE_TIMEOUT_SECS}s)");
            Err(anyhow!("capture timed out after {CAPTURE_TIMEOUT_SECS}s"))
        }
    };
    log_debug!("tick {tick}: capture took {}ms", started.elapsed().as_millis());

    Some(result)
}

pub(super) async fn release(device: &DeviceSlot) {
    let released = device.lock().await.take();
    drop(released);
}
