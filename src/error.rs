//! Error types for the invoice-scan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanError`]: a pipeline stage could not complete (camera missing,
//!   OCR service down, backend rejected the invoice). Returned as
//!   `Err(ScanError)` from every [`crate::session::ScanSession`] action. The
//!   session itself stays usable: the user retries the stage or recaptures.
//!
//! * [`MalformedInput`]: the OCR text did not contain the three section
//!   headers. This is not a failure of the pipeline; the parse simply found
//!   no items. [`crate::pipeline::parse::parse`] collapses it to an empty
//!   list, and only [`crate::pipeline::parse::try_parse`] surfaces it.

use std::path::PathBuf;
use thiserror::Error;

/// All stage-level errors returned by the invoice-scan library.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Capture errors ────────────────────────────────────────────────────
    /// No camera permission or hardware for the requested facing mode.
    #[error("Camera unavailable ({facing}): {reason}")]
    DeviceUnavailable { facing: String, reason: String },

    /// A frame was requested but no camera is running.
    #[error("No active camera.\nStart the camera before capturing.")]
    NoActiveCamera,

    /// Extraction was requested before an image was captured.
    #[error("No captured image.\nCapture an invoice image first.")]
    NothingCaptured,

    /// The grabbed frame could not be encoded.
    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Transport failure talking to the OCR service or the backend.
    #[error("Network error contacting {service}: {reason}\nCheck your connection and retry.")]
    NetworkError { service: String, reason: String },

    /// The OCR service answered but reported a processing failure.
    #[error("OCR service error: {message}\nRecapture the invoice and try again.")]
    ServiceError { message: String },

    /// The backend answered the submission with a non-success status.
    #[error("Backend rejected the invoice (HTTP {status}): {detail}")]
    BackendRejected { status: u16, detail: String },

    // ── Review / submission errors ────────────────────────────────────────
    /// The submission failed local validation and was not sent.
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// An operator-entered invoice number contains disallowed characters.
    #[error("Invalid invoice number '{0}': only letters, digits and spaces are allowed")]
    InvalidInvoiceNumber(String),

    /// An edit addressed a row that does not exist.
    #[error("Row {index} is out of range (invoice has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write an exported file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Whether repeating the same stage without recapturing can succeed.
    ///
    /// Only transport failures qualify. A service error means the image
    /// itself was not processable, so the user must recapture.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::NetworkError { .. })
    }
}

/// The OCR text lacks one of the section headers the parser anchors on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Section header '{header}' not found in OCR text")]
pub struct MalformedInput {
    pub header: String,
}

/// Trimmed, length-limited excerpt of a response body for error messages.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    if body.is_empty() {
        "<empty body>".to_string()
    } else if body.chars().count() > MAX {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        body.to_string()
    }
}
