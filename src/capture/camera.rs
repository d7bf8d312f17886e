use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::info;

use crate::config::CameraSource;

use super::Frame;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "bmp", "gif"];

/// Something that can hand out a capture device.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Acquires the device. Dropping the returned value releases it.
    async fn open(&self) -> Result<Box<dyn CaptureDevice>>;
}

/// An acquired capture device.
#[async_trait]
pub trait CaptureDevice: Send {
    async fn capture(&mut self) -> Result<Frame>;
}

pub fn camera_from_source(source: &CameraSource) -> Arc<dyn Camera> {
    match source {
        CameraSource::Directory(dir) => Arc::new(DirectoryCamera::new(dir.clone())),
        CameraSource::Command { program, args } => {
            Arc::new(CommandCamera::new(program.clone(), args.clone()))
        }
    }
}

async fn encode_off_thread(raw: Vec<u8>) -> Result<Frame> {
    tokio::task::spawn_blocking(move || Frame::from_image_bytes(&raw))
        .await
        .context("frame encoder worker join failed")?
}

/// Treats a directory of still images as a camera, returning them in
/// file-name order and wrapping around.
pub struct DirectoryCamera {
    dir: PathBuf,
}

impl DirectoryCamera {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Camera for DirectoryCamera {
    async fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to open camera directory {}", self.dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            bail!("no images found in {}", self.dir.display());
        }

        info!(
            "capture device acquired: {} ({} images)",
            self.dir.display(),
            files.len()
        );
        Ok(Box::new(DirectoryDevice {
            dir: self.dir.clone(),
            files,
            next: 0,
        }))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

struct DirectoryDevice {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

#[async_trait]
impl CaptureDevice for DirectoryDevice {
    async fn capture(&mut self) -> Result<Frame> {
        let path = self.files[self.next % self.files.len()].clone();
        self.next = self.next.wrapping_add(1);

        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        encode_off_thread(raw).await
    }
}

impl Drop for DirectoryDevice {
    fn drop(&mut self) {
        info!("capture device released: {}", self.dir.display());
    }
}

/// Runs an external grabber once per capture; whatever image it writes to
/// stdout becomes the frame. For a webcam on Linux, something like
/// `ffmpeg -loglevel error -f v4l2 -i /dev/video0 -frames:v 1 -f image2pipe -`.
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl Camera for CommandCamera {
    async fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        if self.program.is_empty() {
            bail!("camera command is empty");
        }
        info!("capture device acquired: `{}`", self.program);
        Ok(Box::new(CommandDevice {
            program: self.program.clone(),
            args: self.args.clone(),
        }))
    }
}

struct CommandDevice {
    program: String,
    args: Vec<String>,
}

#[async_trait]
impl CaptureDevice for CommandDevice {
    async fn capture(&mut self) -> Result<Frame> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        if output.stdout.is_empty() {
            bail!("`{}` produced no image data", self.program);
        }

        encode_off_thread(output.stdout).await
    }
}

impl Drop for CommandDevice {
    fn drop(&mut self) {
        info!("capture device released: `{}`", self.program);
    }
}
