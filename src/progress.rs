//! Progress-callback trait for scan-session stage events.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::config::ScanConfigBuilder::progress_callback`] to receive an event
//! whenever a pipeline stage starts, finishes or fails. Front ends turn these
//! into transient notifications: a spinner while the OCR request is in
//! flight, a toast when the backend rejects an invoice, "no items found" when
//! the parse comes back empty.
//!
//! # Example
//!
//! ```rust
//! use invoice_scan::{ScanConfig, ScanProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl ScanProgressCallback for FailureCounter {
//!     fn on_stage_error(&self, stage: Stage, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} failed: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter { failures: AtomicUsize::new(0) });
//!
//! let config = ScanConfig::builder()
//!     .progress_callback(counter as Arc<dyn ScanProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A step of the scan pipeline, in data-flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Acquiring or switching the camera device.
    Camera,
    /// Grabbing and encoding a still frame.
    Capture,
    /// OCR request plus line-item parsing.
    Extraction,
    /// POSTing the reviewed invoice to the backend.
    Submission,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Camera => "camera",
            Stage::Capture => "capture",
            Stage::Extraction => "extraction",
            Stage::Submission => "submission",
        };
        f.write_str(name)
    }
}

/// Called by a [`crate::session::ScanSession`] as each stage runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync` so one
/// callback can be shared with a UI thread.
pub trait ScanProgressCallback: Send + Sync {
    /// Called before a stage starts its work (and before any network I/O).
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage completes.
    ///
    /// # Arguments
    /// * `stage`: the stage that finished
    /// * `detail`: short human-readable summary ("3 items", "INV-…")
    fn on_stage_complete(&self, stage: Stage, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called when a stage fails. The session remains usable.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called when an extraction succeeded but the text held no line items.
    fn on_no_items(&self, reason: &str) {
        let _ = reason;
    }

    /// Called whenever the camera device handle is released.
    fn on_camera_released(&self, facing: &str) {
        let _ = facing;
    }
}

/// A no-op implementation for callers that don't need stage events.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ScanConfig`].
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;
