pub mod audio;
pub mod auth;
pub mod capture;
pub mod cli;
pub mod config;
pub mod inference;
pub mod pipeline;
pub mod recommend;
pub mod session;
mod utils;

use anyhow::{anyhow, Context, Result};

use capture::camera_from_source;
use config::Config;
use session::MoodSession;

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("moodplay starting up...");

    let config = Config::from_env().context("invalid configuration")?;
    let source = config.capture.camera.clone().ok_or_else(|| {
        anyhow!("no capture device configured; set MOODPLAY_CAMERA_DIR or MOODPLAY_CAMERA_COMMAND")
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        let session = MoodSession::from_config(&config, camera_from_source(&source))?;
        if config.seed.is_none() {
            log::warn!("SPOTIFY_REFRESH_TOKEN is not set; use `signin <refresh-token>` before recording");
        }
        cli::serve(session).await
    })
}
