//! Still-image capture: loads a frame from disk and normalizes it to JPEG.

use chrono::Utc;
use faceclock_core::{CaptureError, CaptureSource, CapturedImage};
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use std::path::{Path, PathBuf};

/// Luma below this counts as a dark pixel.
const DARK_PIXEL_LUMA: u8 = 32;
/// Fraction of dark pixels above which a frame is rejected.
const DARK_FRAME_RATIO: f32 = 0.95;
const JPEG_QUALITY: u8 = 90;

/// Average pixel brightness (0.0–255.0).
pub fn avg_brightness(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
}

/// Returns true if more than `threshold_pct` of pixels are darker than
/// [`DARK_PIXEL_LUMA`].
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < DARK_PIXEL_LUMA).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Decode `raw`, reject black frames, and return JPEG bytes. JPEG input is
/// passed through untouched.
pub fn normalize_still(raw: &[u8]) -> Result<Vec<u8>, CaptureError> {
    let format = image::guess_format(raw).map_err(|e| CaptureError::Decode(e.to_string()))?;
    let decoded =
        image::load_from_memory_with_format(raw, format).map_err(|e| CaptureError::Decode(e.to_string()))?;

    let luma = decoded.to_luma8();
    let brightness = avg_brightness(luma.as_raw());
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        format = ?format,
        brightness,
        "decoded still frame"
    );
    if is_dark_frame(luma.as_raw(), DARK_FRAME_RATIO) {
        return Err(CaptureError::TooDark);
    }

    if format == ImageFormat::Jpeg {
        return Ok(raw.to_vec());
    }
    let rgb = decoded.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| CaptureError::Decode(format!("JPEG encoding failed: {e}")))?;
    Ok(out)
}

/// Capture source backed by an image file, e.g. a frame written by an
/// external camera tool.
pub struct StillImageCapture {
    path: PathBuf,
}

impl StillImageCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for StillImageCapture {
    fn capture(&mut self) -> Result<CapturedImage, CaptureError> {
        let raw = std::fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::SourceUnavailable(self.path.display().to_string())
            } else {
                CaptureError::Io(e)
            }
        })?;
        let jpeg = normalize_still(&raw)?;
        tracing::info!(path = %self.path.display(), bytes = jpeg.len(), "frame captured");
        Ok(CapturedImage::new(jpeg, Utc::now()))
    }
}
