//! Frame encoding: `DynamicImage` → [`CapturedImage`] → base64 data URI.
//!
//! The OCR service accepts the image as a `base64Image` form field holding a
//! `data:<mime>;base64,<payload>` URI. PNG is the default because it is
//! lossless; JPEG artefacts around thin glyphs hurt recognition more than
//! the larger upload costs.

use crate::config::CaptureFormat;
use crate::error::ScanError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// An encoded still image grabbed from the camera.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    format: CaptureFormat,
    width: u32,
    height: u32,
}

impl CapturedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The image as a `data:` URI, the shape the OCR form field expects.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.bytes))
    }
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Encode a grabbed frame, downscaling it so neither edge exceeds `max_dimension`.
pub fn encode_frame(
    frame: &DynamicImage,
    format: CaptureFormat,
    max_dimension: u32,
) -> Result<CapturedImage, ScanError> {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return Err(ScanError::ImageEncoding("frame has zero size".into()));
    }

    let scaled;
    let frame = if w.max(h) > max_dimension {
        scaled = frame.resize(max_dimension, max_dimension, FilterType::Triangle);
        debug!(
            "Downscaled frame {}x{} → {}x{}",
            w,
            h,
            scaled.width(),
            scaled.height()
        );
        &scaled
    } else {
        frame
    };

    // JPEG has no alpha channel.
    let rgb;
    let frame = if format == CaptureFormat::Jpeg {
        rgb = DynamicImage::ImageRgb8(frame.to_rgb8());
        &rgb
    } else {
        frame
    };

    let mut buf = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut buf), format.image_format())
        .map_err(|e| ScanError::ImageEncoding(e.to_string()))?;

    debug!("Encoded frame → {} bytes {}", buf.len(), format.mime_type());

    Ok(CapturedImage {
        bytes: buf,
        format,
        width: frame.width(),
        height: frame.height(),
    })
}
