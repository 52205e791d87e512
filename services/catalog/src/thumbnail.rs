//! Thumbnail derivation.
//!
//! Decodes an uploaded image, scales it to fit inside a bounding box while
//! keeping its aspect ratio, and re-encodes it as JPEG. Images already inside
//! the box keep their dimensions. CPU work runs on the blocking pool.

use crate::config::ThumbnailBounds;
use crate::error::MediaError;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// A derived JPEG thumbnail
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Produces bounded-dimension JPEG thumbnails
#[derive(Debug, Clone)]
pub struct ThumbnailDeriver {
    bounds: ThumbnailBounds,
    quality: u8,
}

impl ThumbnailDeriver {
    pub fn new(bounds: ThumbnailBounds, quality: u8) -> Self {
        Self { bounds, quality }
    }

    /// Derive a thumbnail (blocking)
    pub fn derive(&self, original: &[u8]) -> Result<Thumbnail, MediaError> {
        let img = image::load_from_memory(original).map_err(|e| MediaError::Decode {
            format: describe_format(original),
            message: e.to_string(),
        })?;

        let (orig_w, orig_h) = img.dimensions();
        let (new_w, new_h) = self.fit(orig_w, orig_h);

        let resized = if (new_w, new_h) == (orig_w, orig_h) {
            debug!(width = orig_w, height = orig_h, "Image within bounds, re-encoding as-is");
            img
        } else {
            img.resize_exact(new_w, new_h, FilterType::Lanczos3)
        };

        let (width, height) = resized.dimensions();
        if width == 0 || height == 0 {
            return Err(MediaError::Resize { width, height });
        }

        let data = self.encode_jpeg(&resized)?;

        debug!(
            original_width = orig_w,
            original_height = orig_h,
            width,
            height,
            size = data.len(),
            "Thumbnail derived"
        );

        Ok(Thumbnail {
            data,
            width,
            height,
        })
    }

    /// Derive a thumbnail on the blocking thread pool
    pub async fn derive_async(self: Arc<Self>, original: Bytes) -> Result<Thumbnail, MediaError> {
        tokio::task::spawn_blocking(move || self.derive(&original))
            .await
            .map_err(|e| MediaError::Task(format!("thumbnail task failed: {e}")))?
    }

    /// Target dimensions: unchanged when already inside the box, otherwise
    /// scaled by the tighter of the two ratios with each side at least 1px.
    fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        let max_w = self.bounds.max_width.max(1);
        let max_h = self.bounds.max_height.max(1);

        if width <= max_w && height <= max_h {
            return (width, height);
        }

        let ratio = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
        let scaled = |side: u32, max: u32| ((side as f64 * ratio).round() as u32).clamp(1, max);

        (scaled(width, max_w), scaled(height, max_h))
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Bytes, MediaError> {
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buf = Vec::new();

        rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(self.quality))
            .map_err(|e| MediaError::Encode(e.to_string()))?;

        Ok(Bytes::from(buf))
    }
}

fn describe_format(data: &[u8]) -> String {
    match image::guess_format(data) {
        Ok(format) => format!("{:?}", format),
        Err(_) => "unrecognized".to_string(),
    }
}
