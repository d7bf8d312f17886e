pub mod controller;
pub mod engine;
pub mod fetch;

pub use controller::{PlaybackController, PlaybackHandle};
pub use engine::{AudioEngine, RodioEngine};
pub use fetch::{HttpPreviewFetcher, PreviewFetcher};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("failed to download preview: {0}")]
    Fetch(String),
    #[error("preview is not playable audio: {0}")]
    Decode(String),
    #[error("audio output failed: {0}")]
    Device(String),
    #[error("audio engine is not running")]
    EngineUnavailable,
}
