use std::{fmt, io::Cursor, sync::Arc};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use uuid::Uuid;

/// Longest edge sent to the inference service.
pub const MAX_FRAME_EDGE: u32 = 1280;

/// One captured still, JPEG encoded. Cheap to clone; the bytes are shared.
#[derive(Clone)]
pub struct Frame {
    id: Uuid,
    captured_at: DateTime<Utc>,
    jpeg: Arc<[u8]>,
}

impl Frame {
    pub fn from_jpeg(jpeg: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            jpeg: jpeg.into(),
        }
    }

    /// Decodes any format `image` understands and re-encodes it as JPEG.
    pub fn from_image_bytes(raw: &[u8]) -> Result<Self> {
        encode_jpeg(raw).map(Self::from_jpeg)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("captured_at", &self.captured_at)
            .field("bytes", &self.jpeg.len())
            .finish()
    }
}

pub fn encode_jpeg(raw: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(raw).context("captured data is not a decodable image")?;

    let img = if img.width().max(img.height()) > MAX_FRAME_EDGE {
        img.resize(MAX_FRAME_EDGE, MAX_FRAME_EDGE, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .context("jpeg encoding failed")?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 90, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_is_reencoded_as_jpeg() {
        let frame = Frame::from_image_bytes(&png_fixture(8, 8)).unwrap();
        assert_eq!(&frame.jpeg()[..2], &[0xFF, 0xD8]);
        assert!(frame.to_data_url().starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn large_frames_are_downscaled() {
        let jpeg = encode_jpeg(&png_fixture(2560, 1000)).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), MAX_FRAME_EDGE);
        assert!(decoded.height() <= 500 + 1);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Frame::from_image_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn clones_share_identity() {
        let frame = Frame::from_jpeg(vec![1, 2, 3]);
        let copy = frame.clone();
        assert_eq!(frame.id(), copy.id());
        assert_eq!(copy.len(), 3);
    }
}
