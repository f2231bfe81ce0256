//! # invoice-scan
//!
//! Turn a photographed paper invoice into structured line items and record
//! them in an inventory backend.
//!
//! ## Why this crate?
//!
//! Receiving clerks type delivery invoices into the inventory system by hand.
//! The printed invoices share one table layout (`DESCRIPTION`, `ID`, `QT.`
//! columns), so a photo, an OCR pass and a positional parse get most rows
//! right; the clerk only fixes what the OCR misread and submits.
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera
//!  │
//!  ├─ 1. Capture  acquire a sensor, grab one frame (device released on drop)
//!  ├─ 2. Encode   downscale, PNG/JPEG → base64 data URI
//!  ├─ 3. OCR      POST to an OCR.space-compatible service
//!  ├─ 4. Parse    slice text at the column headers → LineItem rows
//!  ├─ 5. Review   operator edits single fields in place
//!  └─ 6. Submit   POST /invoices/ to the inventory backend
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_scan::{FacingMode, ScanConfig, ScanSession, StillFrameCamera, SubmissionContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::builder().ocr_api_key("K81234567888957").build()?;
//!     let camera = StillFrameCamera::new().with_file(FacingMode::Environment, "invoice.jpg");
//!
//!     let mut session = ScanSession::with_http(config, camera)?;
//!     session.start_default_camera().await?;
//!     session.capture()?;
//!     session.extract().await?;
//!     for item in session.items() {
//!         println!("{} × {} ({})", item.quantity, item.description, item.external_id);
//!     }
//!     let receipt = session.submit(&SubmissionContext::new("ABC Vendor", 5)).await?;
//!     eprintln!("stored as {}", receipt.invoice_number);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-scan` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice-scan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CaptureFormat, FacingMode, ScanConfig, ScanConfigBuilder};
pub use error::{MalformedInput, ScanError};
pub use pipeline::capture::{CameraBackend, CameraHandle, FrameSource, StillFrameCamera, VideoStream};
pub use pipeline::encode::CapturedImage;
pub use pipeline::ocr::{OcrSpaceClient, RawOcrText, SavedText, TextExtractor};
pub use pipeline::parse::{parse, try_parse, ColumnHeaders, LineItem};
pub use pipeline::review::{FieldEdit, ReviewStore};
pub use pipeline::submit::{
    HttpInvoiceBackend, InvoiceBackend, InvoiceNumber, InvoiceSubmission, ScannedInvoiceSummary,
    SubmissionContext, SubmissionReceipt, Vendor,
};
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback, Stage};
pub use session::{Extraction, ScanSession, SessionState};
