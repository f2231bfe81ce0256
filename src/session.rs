//! A scan session: one invoice moving through the pipeline.
//!
//! [`ScanSession`] owns one instance of every stage and exposes the discrete
//! actions an operator takes (start camera, capture, extract, edit, submit).
//! Each action runs to completion or fails at its own stage boundary; a
//! failure never destroys state an earlier stage produced, so the operator
//! can always retry the failed step or recapture.
//!
//! Actions take `&mut self`, so a second capture or submit cannot start while
//! a request is still in flight.

use crate::config::{FacingMode, ScanConfig};
use crate::error::ScanError;
use crate::pipeline::capture::{CameraBackend, CameraHandle};
use crate::pipeline::encode::CapturedImage;
use crate::pipeline::ocr::{OcrSpaceClient, RawOcrText, TextExtractor};
use crate::pipeline::parse::{self, LineItem};
use crate::pipeline::review::{FieldEdit, ReviewStore};
use crate::pipeline::submit::{
    HttpInvoiceBackend, InvoiceBackend, InvoiceSubmission, SubmissionContext, SubmissionReceipt,
};
use crate::progress::Stage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No camera, no image, nothing to review.
    Idle,
    /// Camera open, nothing captured yet.
    CameraLive,
    /// An image is captured; no line items (not extracted, or none found).
    Captured,
    /// Line items are waiting for review and submission.
    Reviewing,
}

/// Outcome of an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Number of line items now in the review store.
    pub items: usize,
    /// Why no items were found, when `items == 0`.
    pub no_items_reason: Option<String>,
}

/// One invoice scan, from camera to backend.
pub struct ScanSession<C: CameraBackend> {
    config: ScanConfig,
    camera: C,
    handle: Option<CameraHandle>,
    captured: Option<CapturedImage>,
    review: ReviewStore,
    extractor: Arc<dyn TextExtractor>,
    backend: Arc<dyn InvoiceBackend>,
}

impl<C: CameraBackend> ScanSession<C> {
    /// Session wired to explicit OCR and backend adapters.
    pub fn new(
        config: ScanConfig,
        camera: C,
        extractor: Arc<dyn TextExtractor>,
        backend: Arc<dyn InvoiceBackend>,
    ) -> Self {
        Self {
            config,
            camera,
            handle: None,
            captured: None,
            review: ReviewStore::new(),
            extractor,
            backend,
        }
    }

    /// Session wired to the HTTP OCR client and HTTP backend described by `config`.
    pub fn with_http(config: ScanConfig, camera: C) -> Result<Self, ScanError> {
        let extractor: Arc<dyn TextExtractor> = Arc::new(OcrSpaceClient::from_config(&config)?);
        let backend: Arc<dyn InvoiceBackend> = Arc::new(HttpInvoiceBackend::from_config(&config)?);
        Ok(Self::new(config, camera, extractor, backend))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn backend(&self) -> &Arc<dyn InvoiceBackend> {
        &self.backend
    }

    pub fn state(&self) -> SessionState {
        if !self.review.is_empty() {
            SessionState::Reviewing
        } else if self.captured.is_some() {
            SessionState::Captured
        } else if self.handle.is_some() {
            SessionState::CameraLive
        } else {
            SessionState::Idle
        }
    }

    /// Facing mode of the open camera, if any.
    pub fn active_facing(&self) -> Option<FacingMode> {
        self.handle.as_ref().map(CameraHandle::facing)
    }

    pub fn captured(&self) -> Option<&CapturedImage> {
        self.captured.as_ref()
    }

    /// Current review rows.
    pub fn items(&self) -> &[LineItem] {
        self.review.items()
    }

    // ── Camera ───────────────────────────────────────────────────────────

    /// Open the camera facing `facing`.
    ///
    /// A camera already open on the other sensor is released first.
    pub async fn start_camera(&mut self, facing: FacingMode) -> Result<(), ScanError> {
        if self.active_facing() == Some(facing) {
            return Ok(());
        }
        self.stop_camera();

        self.notify_start(Stage::Camera);
        let progress = self.config.progress_callback.clone();
        match CameraHandle::open(&self.camera, facing, progress).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.notify_complete(Stage::Camera, facing.as_str());
                Ok(())
            }
            Err(e) => Err(self.notify_error(Stage::Camera, e)),
        }
    }

    /// Open the camera with the configured default facing mode.
    pub async fn start_default_camera(&mut self) -> Result<(), ScanError> {
        let facing = self.config.default_facing;
        self.start_camera(facing).await
    }

    /// Release the current device and acquire the opposite sensor.
    pub async fn switch_facing(&mut self) -> Result<FacingMode, ScanError> {
        let next = self
            .active_facing()
            .unwrap_or(self.config.default_facing)
            .toggled();
        self.start_camera(next).await?;
        Ok(next)
    }

    /// Release the camera device, if one is open.
    pub fn stop_camera(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }

    // ── Capture ──────────────────────────────────────────────────────────

    /// Grab the current frame. Replaces any earlier capture.
    pub fn capture(&mut self) -> Result<&CapturedImage, ScanError> {
        self.notify_start(Stage::Capture);
        let format = self.config.image_format;
        let max_dimension = self.config.max_image_dimension;

        let result = match self.handle.as_mut() {
            Some(handle) => handle.capture(format, max_dimension),
            None => Err(ScanError::NoActiveCamera),
        };

        match result {
            Ok(image) => {
                let (w, h) = image.dimensions();
                info!("Captured {}x{} frame ({} bytes)", w, h, image.len());
                self.notify_complete(Stage::Capture, &format!("{w}x{h}"));
                let image = self.captured.insert(image);
                Ok(&*image)
            }
            Err(e) => Err(self.notify_error(Stage::Capture, e)),
        }
    }

    /// Throw away the capture and any parsed items, and release the camera.
    pub fn recapture(&mut self) {
        self.captured = None;
        self.review.clear();
        self.stop_camera();
        info!("Recapture: session reset");
    }

    // ── Extraction ───────────────────────────────────────────────────────

    /// Run OCR on the captured image and load the parsed rows for review.
    ///
    /// The captured image is kept, so a network failure can be retried
    /// without recapturing.
    pub async fn extract(&mut self) -> Result<Extraction, ScanError> {
        self.notify_start(Stage::Extraction);
        let start = Instant::now();

        let Some(captured) = self.captured.as_ref() else {
            return Err(self.notify_error(Stage::Extraction, ScanError::NothingCaptured));
        };

        let extractor = Arc::clone(&self.extractor);
        let result = extractor.extract(captured).await;
        match result {
            Ok(text) => {
                let extraction = self.load_text(&text);
                info!(
                    "Extraction via {}: {} items in {:?}",
                    extractor.name(),
                    extraction.items,
                    start.elapsed()
                );
                Ok(extraction)
            }
            Err(e) => Err(self.notify_error(Stage::Extraction, e)),
        }
    }

    /// Parse already-recognised text into the review store, skipping OCR.
    pub fn load_text(&mut self, text: &RawOcrText) -> Extraction {
        let extraction = match parse::try_parse(text.as_str(), &self.config.headers) {
            Ok(items) => {
                let n = items.len();
                self.review.replace_all(items);
                Extraction {
                    items: n,
                    no_items_reason: (n == 0).then(|| "the item table is empty".to_string()),
                }
            }
            Err(malformed) => {
                self.review.clear();
                Extraction {
                    items: 0,
                    no_items_reason: Some(malformed.to_string()),
                }
            }
        };

        if let Some(ref reason) = extraction.no_items_reason {
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_no_items(reason);
            }
        }
        self.notify_complete(Stage::Extraction, &format!("{} items", extraction.items));
        extraction
    }

    // ── Review ───────────────────────────────────────────────────────────

    /// Change one field of one row.
    pub fn edit(&mut self, index: usize, edit: FieldEdit) -> Result<(), ScanError> {
        self.review.edit(index, edit)
    }

    /// Write the review rows to `path` as pretty JSON.
    pub async fn export_items(&self, path: impl AsRef<Path>) -> Result<(), ScanError> {
        let json = serde_json::to_vec_pretty(self.review.items())
            .map_err(|e| ScanError::Internal(format!("serialize line items: {e}")))?;
        write_atomic(path.as_ref(), &json).await
    }

    /// Write the encoded capture to `path`.
    pub async fn save_capture(&self, path: impl AsRef<Path>) -> Result<(), ScanError> {
        let captured = self.captured.as_ref().ok_or(ScanError::NothingCaptured)?;
        write_atomic(path.as_ref(), captured.bytes()).await
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Send the reviewed items to the backend.
    ///
    /// On success the review rows and the captured image are cleared; the
    /// camera stays as it is, ready for the next invoice. On any failure all
    /// state is kept so the operator can retry.
    pub async fn submit(&mut self, ctx: &SubmissionContext) -> Result<SubmissionReceipt, ScanError> {
        self.notify_start(Stage::Submission);

        let submission = match InvoiceSubmission::build(ctx, self.review.items()) {
            Ok(s) => s,
            Err(e) => return Err(self.notify_error(Stage::Submission, e)),
        };

        let backend = Arc::clone(&self.backend);
        let result = backend.create_invoice(&submission).await;
        match result {
            Ok(receipt) => {
                self.review.clear();
                self.captured = None;
                self.notify_complete(Stage::Submission, receipt.invoice_number.as_str());
                Ok(receipt)
            }
            Err(e) => Err(self.notify_error(Stage::Submission, e)),
        }
    }

    // ── Notifications ────────────────────────────────────────────────────

    fn notify_start(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
    }

    fn notify_complete(&self, stage: Stage, detail: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, detail);
        }
    }

    fn notify_error(&self, stage: Stage, error: ScanError) -> ScanError {
        warn!("{} failed: {}", stage, error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_error(stage, &error.to_string());
        }
        error
    }
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScanError> {
    let failed = |source| ScanError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::capture::{FrameSource, StillFrameCamera};
    use crate::pipeline::submit::{ScannedInvoiceSummary, Vendor};
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;

    const INVOICE_TEXT: &str = "DESCRIPTION\nMuffin\nBagel\nID\n1001\n1002\nQT.\n3\n5";

    /// Returns fixed text, or a service error when `None`.
    struct FixedText(Option<&'static str>);

    #[async_trait]
    impl TextExtractor for FixedText {
        async fn extract(&self, _image: &CapturedImage) -> Result<RawOcrText, ScanError> {
            self.0.map(RawOcrText::new).ok_or_else(|| ScanError::ServiceError {
                message: "E500: image could not be processed".into(),
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        fail_with: Option<u16>,
        received: Mutex<Vec<InvoiceSubmission>>,
    }

    #[async_trait]
    impl InvoiceBackend for RecordingBackend {
        async fn create_invoice(
            &self,
            submission: &InvoiceSubmission,
        ) -> Result<SubmissionReceipt, ScanError> {
            self.received.lock().unwrap().push(submission.clone());
            match self.fail_with {
                Some(status) => Err(ScanError::BackendRejected {
                    status,
                    detail: "boom".into(),
                }),
                None => Ok(SubmissionReceipt {
                    invoice_number: submission.invoice_number.clone(),
                    status: 201,
                    scan_id: Some(1),
                    message: None,
                }),
            }
        }

        async fn list_vendors(&self) -> Result<Vec<Vendor>, ScanError> {
            Ok(vec![])
        }

        async fn list_invoices(&self) -> Result<Vec<ScannedInvoiceSummary>, ScanError> {
            Ok(vec![])
        }
    }

    fn camera() -> StillFrameCamera {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([255, 255, 255])));
        StillFrameCamera::new()
            .with_source(FacingMode::Environment, FrameSource::Memory(frame.clone()))
            .with_source(FacingMode::User, FrameSource::Memory(frame))
    }

    fn session(
        text: Option<&'static str>,
        backend: Arc<RecordingBackend>,
    ) -> ScanSession<StillFrameCamera> {
        ScanSession::new(
            ScanConfig::default(),
            camera(),
            Arc::new(FixedText(text)),
            backend,
        )
    }

    async fn reviewing(backend: Arc<RecordingBackend>) -> ScanSession<StillFrameCamera> {
        let mut s = session(Some(INVOICE_TEXT), backend);
        s.start_default_camera().await.unwrap();
        s.capture().unwrap();
        s.extract().await.unwrap();
        s
    }

    #[tokio::test]
    async fn walks_through_states() {
        let mut s = session(Some(INVOICE_TEXT), Arc::default());
        assert_eq!(s.state(), SessionState::Idle);
        s.start_default_camera().await.unwrap();
        assert_eq!(s.state(), SessionState::CameraLive);
        s.capture().unwrap();
        assert_eq!(s.state(), SessionState::Captured);
        let extraction = s.extract().await.unwrap();
        assert_eq!(extraction.items, 2);
        assert_eq!(s.state(), SessionState::Reviewing);
    }

    #[tokio::test]
    async fn capture_without_camera_fails() {
        let mut s = session(Some(INVOICE_TEXT), Arc::default());
        assert!(matches!(s.capture(), Err(ScanError::NoActiveCamera)));
    }

    #[tokio::test]
    async fn extract_without_capture_fails() {
        let mut s = session(Some(INVOICE_TEXT), Arc::default());
        assert!(matches!(s.extract().await, Err(ScanError::NothingCaptured)));
    }

    #[tokio::test]
    async fn switch_facing_releases_previous_device() {
        let mut s = session(Some(INVOICE_TEXT), Arc::default());
        s.start_camera(FacingMode::Environment).await.unwrap();
        assert!(s.camera().is_open(FacingMode::Environment));

        let next = s.switch_facing().await.unwrap();
        assert_eq!(next, FacingMode::User);
        assert!(!s.camera().is_open(FacingMode::Environment));
        assert!(s.camera().is_open(FacingMode::User));
    }

    #[tokio::test]
    async fn recapture_resets_everything_and_releases_camera() {
        let mut s = reviewing(Arc::default()).await;
        s.recapture();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.items().is_empty());
        assert!(!s.camera().is_open(FacingMode::Environment));
    }

    #[tokio::test]
    async fn malformed_text_reports_no_items() {
        let mut s = session(Some("DESCRIPTION\nMuffin\nQT.\n3"), Arc::default());
        s.start_default_camera().await.unwrap();
        s.capture().unwrap();
        let extraction = s.extract().await.unwrap();
        assert_eq!(extraction.items, 0);
        assert!(extraction.no_items_reason.unwrap().contains("'ID'"));
        assert_eq!(s.state(), SessionState::Captured);
    }

    #[tokio::test]
    async fn service_error_keeps_capture() {
        let mut s = session(None, Arc::default());
        s.start_default_camera().await.unwrap();
        s.capture().unwrap();
        assert!(matches!(
            s.extract().await,
            Err(ScanError::ServiceError { .. })
        ));
        assert!(s.captured().is_some());
    }

    #[tokio::test]
    async fn submit_sends_edited_quantity_and_clears() {
        let backend = Arc::new(RecordingBackend::default());
        let mut s = reviewing(Arc::clone(&backend)).await;
        s.edit(0, FieldEdit::Quantity(10)).unwrap();

        let receipt = s
            .submit(&SubmissionContext::new("ABC Vendor", 5))
            .await
            .unwrap();
        assert_eq!(receipt.status, 201);

        let sent = backend.received.lock().unwrap();
        assert_eq!(sent[0].line_items[0].quantity, 10);
        assert_eq!(sent[0].line_items[1].quantity, 5);
        assert!(s.items().is_empty());
        assert!(s.captured().is_none());
        assert_eq!(s.state(), SessionState::CameraLive);
    }

    #[tokio::test]
    async fn failed_submit_keeps_items() {
        let backend = Arc::new(RecordingBackend {
            fail_with: Some(500),
            ..Default::default()
        });
        let mut s = reviewing(backend).await;
        s.edit(1, FieldEdit::Description("Sesame Bagel".into())).unwrap();
        let before = s.items().to_vec();

        let err = s
            .submit(&SubmissionContext::new("ABC Vendor", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::BackendRejected { status: 500, .. }));
        assert_eq!(s.items(), before.as_slice());
        assert!(s.captured().is_some());
    }

    #[tokio::test]
    async fn empty_review_is_not_submitted() {
        let backend = Arc::new(RecordingBackend::default());
        let mut s = session(Some(INVOICE_TEXT), Arc::clone(&backend));
        let err = s
            .submit(&SubmissionContext::new("ABC Vendor", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidSubmission(_)));
        assert!(backend.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_session_releases_camera() {
        let cam = camera();
        let registry = cam.clone();
        let mut s = ScanSession::new(
            ScanConfig::default(),
            cam,
            Arc::new(FixedText(Some(INVOICE_TEXT))),
            Arc::new(RecordingBackend::default()),
        );
        s.start_default_camera().await.unwrap();
        assert!(registry.is_open(FacingMode::Environment));
        drop(s);
        assert!(!registry.is_open(FacingMode::Environment));
    }

    #[tokio::test]
    async fn export_items_writes_json() {
        let s = reviewing(Arc::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("items.json");
        s.export_items(&path).await.unwrap();

        let written: Vec<LineItem> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, s.items());
        assert!(!dir.path().join("out").join("items.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_capture_requires_an_image() {
        let s = session(Some(INVOICE_TEXT), Arc::default());
        let dir = tempfile::tempdir().unwrap();
        let err = s.save_capture(dir.path().join("x.png")).await.unwrap_err();
        assert!(matches!(err, ScanError::NothingCaptured));
    }
}
