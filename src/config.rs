//! Configuration types for an invoice scan session.
//!
//! Every knob of the pipeline lives in [`ScanConfig`], built via its
//! [`ScanConfigBuilder`]. The same value configures the camera stage (facing
//! mode, frame size, image format), the OCR adapter (endpoint, credentials,
//! retries) and the submission adapter (backend URL).

use crate::error::ScanError;
use crate::pipeline::parse::ColumnHeaders;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default OCR endpoint (OCR.space compatible).
pub const DEFAULT_OCR_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Default inventory backend base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Upper bound accepted for [`ScanConfig::max_retries`].
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for an invoice scan session.
///
/// Built via [`ScanConfig::builder()`] or using [`ScanConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_scan::{FacingMode, ScanConfig};
///
/// let config = ScanConfig::builder()
///     .ocr_api_key("K81234567888957")
///     .backend_url("http://inventory.local:8000")
///     .default_facing(FacingMode::Environment)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// OCR service endpoint receiving the multipart upload.
    pub ocr_endpoint: String,

    /// OCR service API key, sent as the `apikey` form field.
    ///
    /// Required by [`crate::pipeline::ocr::OcrSpaceClient`]; custom
    /// [`crate::pipeline::ocr::TextExtractor`] implementations may ignore it.
    pub ocr_api_key: Option<String>,

    /// OCR engine selector, sent as the `ocrEngine` form field. Default: "2".
    pub ocr_engine: String,

    /// Inventory backend base URL (without the `/invoices/` suffix).
    pub backend_url: String,

    /// Per-request timeout for OCR and backend calls in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Retries on an OCR transport failure. Default: 2, at most [`MAX_RETRIES_LIMIT`].
    ///
    /// Service errors (the OCR engine could not read the image) are never
    /// retried; the image has to be recaptured.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Raster format used to encode captured frames. Default: PNG.
    pub image_format: CaptureFormat,

    /// Longest edge of an encoded frame in pixels. Default: 2000.
    ///
    /// Phone cameras produce 4000+ px frames that exceed typical OCR upload
    /// limits; larger frames are downscaled proportionally before encoding.
    pub max_image_dimension: u32,

    /// Section headers the line-item parser anchors on.
    pub headers: ColumnHeaders,

    /// Facing mode used when the camera is started without an explicit choice.
    pub default_facing: FacingMode,

    /// Optional receiver of stage notifications.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_api_key: None,
            ocr_engine: "2".to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            image_format: CaptureFormat::default(),
            max_image_dimension: 2000,
            headers: ColumnHeaders::default(),
            default_facing: FacingMode::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_api_key", &self.ocr_api_key.as_ref().map(|_| "<redacted>"))
            .field("ocr_engine", &self.ocr_engine)
            .field("backend_url", &self.backend_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("image_format", &self.image_format)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("headers", &self.headers)
            .field("default_facing", &self.default_facing)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ScanProgressCallback>"),
            )
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// URL of the invoice-creation endpoint.
    pub fn invoices_url(&self) -> String {
        format!("{}/invoices/", self.backend_url.trim_end_matches('/'))
    }

    /// URL of the vendor listing endpoint.
    pub fn vendors_url(&self) -> String {
        format!("{}/vendors/", self.backend_url.trim_end_matches('/'))
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr_api_key = Some(key.into());
        self
    }

    pub fn ocr_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.ocr_engine = engine.into();
        self
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn image_format(mut self, format: CaptureFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(100);
        self
    }

    pub fn headers(mut self, headers: ColumnHeaders) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn default_facing(mut self, facing: FacingMode) -> Self {
        self.config.default_facing = facing;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        let c = &self.config;
        if !is_http_url(&c.ocr_endpoint) {
            return Err(ScanError::InvalidConfig(format!(
                "OCR endpoint must be an HTTP/HTTPS URL, got '{}'",
                c.ocr_endpoint
            )));
        }
        if !is_http_url(&c.backend_url) {
            return Err(ScanError::InvalidConfig(format!(
                "Backend URL must be an HTTP/HTTPS URL, got '{}'",
                c.backend_url
            )));
        }
        if c.ocr_api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(ScanError::InvalidConfig("OCR API key is empty".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(ScanError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES_LIMIT {
            return Err(ScanError::InvalidConfig(format!(
                "Max retries must be ≤ {}, got {}",
                MAX_RETRIES_LIMIT, c.max_retries
            )));
        }
        c.headers.validate()?;
        Ok(self.config)
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which camera sensor to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front-facing sensor.
    User,
    /// Rear-facing sensor, the one pointed at a paper invoice. (default)
    #[default]
    Environment,
}

impl FacingMode {
    /// The opposite sensor.
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raster format for captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureFormat {
    /// Lossless; keeps small print crisp. (default)
    #[default]
    Png,
    /// Smaller uploads at some cost in text sharpness.
    Jpeg,
}

impl CaptureFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            CaptureFormat::Png => "image/png",
            CaptureFormat::Jpeg => "image/jpeg",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            CaptureFormat::Png => image::ImageFormat::Png,
            CaptureFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = ScanConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.ocr_endpoint, DEFAULT_OCR_ENDPOINT);
        assert_eq!(config.ocr_engine, "2");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.default_facing, FacingMode::Environment);
        assert_eq!(config.image_format, CaptureFormat::Png);
    }

    #[test]
    fn rejects_non_http_backend() {
        let err = ScanConfig::builder()
            .backend_url("localhost:8000")
            .build()
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_blank_api_key() {
        let err = ScanConfig::builder().ocr_api_key("   ").build().unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn rejects_excessive_retries() {
        let err = ScanConfig::builder().max_retries(70).build().unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
        assert!(err.to_string().contains("70"));
        assert!(ScanConfig::builder()
            .max_retries(MAX_RETRIES_LIMIT)
            .build()
            .is_ok());
    }

    #[test]
    fn max_dimension_is_clamped() {
        let config = ScanConfig::builder().max_image_dimension(10).build().unwrap();
        assert_eq!(config.max_image_dimension, 100);
    }

    #[test]
    fn endpoint_urls_tolerate_trailing_slash() {
        let config = ScanConfig::builder()
            .backend_url("http://inventory.local:8000/")
            .build()
            .unwrap();
        assert_eq!(config.invoices_url(), "http://inventory.local:8000/invoices/");
        assert_eq!(config.vendors_url(), "http://inventory.local:8000/vendors/");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = ScanConfig::builder().ocr_api_key("secret-key").build().unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn facing_mode_toggles() {
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.to_string(), "user");
    }
}
