pub mod camera;
pub mod controller;
pub mod frame;
mod loop_worker;

pub use camera::{camera_from_source, Camera, CaptureDevice, CommandCamera, DirectoryCamera};
pub use controller::{CaptureError, CaptureId, CaptureScheduler, FrameHandler};
pub use frame::Frame;
