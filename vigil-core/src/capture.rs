//! Swappable capture collaborators.
//!
//! The camera/encoder and the image resizer vary per platform; the pipeline
//! depends only on these capability traits. Production wiring lives in the
//! agent binary, tests substitute stubs.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Full-resolution still capture.
#[async_trait]
pub trait StillCapture: Send + Sync {
    /// Write a full-resolution color JPEG of the current scene to `dest`.
    async fn capture_jpeg(&self, dest: &Path, quality: u8) -> Result<()>;
}

/// Thumbnail production from an already-captured still.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        max_size: (u32, u32),
        quality: u8,
    ) -> Result<()>;
}

/// Image-crate thumbnailer: aspect-preserving Lanczos3 downscale,
/// RGB-converted, JPEG-encoded at the configured quality. The decode/resize
/// is CPU-bound and runs on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageThumbnailer;

/// Aspect-preserving fit inside the bounding box. Never enlarges; never
/// collapses a dimension to zero.
fn fit_within(width: u32, height: u32, max: (u32, u32)) -> (u32, u32) {
    let scale = (f64::from(max.0) / f64::from(width))
        .min(f64::from(max.1) / f64::from(height))
        .min(1.0);
    (
        (f64::from(width) * scale).round().max(1.0) as u32,
        (f64::from(height) * scale).round().max(1.0) as u32,
    )
}

#[async_trait]
impl Thumbnailer for ImageThumbnailer {
    async fn thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        max_size: (u32, u32),
        quality: u8,
    ) -> Result<()> {
        let source = PathBuf::from(source);
        let dest = PathBuf::from(dest);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let image = image::open(&source)?.to_rgb8();
            let (width, height) = fit_within(image.width(), image.height(), max_size);
            let thumb = imageops::resize(&image, width, height, FilterType::Lanczos3);
            let mut out = BufWriter::new(File::create(&dest)?);
            JpegEncoder::new_with_quality(&mut out, quality).encode_image(&thumb)?;
            Ok(())
        })
        .await
        .map_err(|join| AgentError::Capture(format!("thumbnail task failed: {join}")))?
    }
}
