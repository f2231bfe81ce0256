//! Frame capture: acquire a camera device and grab still frames from it.
//!
//! A camera is an exclusive hardware resource. [`CameraBackend::acquire`]
//! hands out a [`VideoStream`] that owns the device; wrapping it in a
//! [`CameraHandle`] ties the device's lifetime to a Rust value, so it is
//! released on every exit path (explicit stop, facing switch, error, or the
//! session being dropped) without relying on the caller to remember.
//!
//! Switching facing mode is a release followed by a fresh acquire; there is
//! no hot-swap between sensors.

use crate::config::{CaptureFormat, FacingMode};
use crate::error::ScanError;
use crate::pipeline::encode::{encode_frame, CapturedImage};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A live video stream from an open camera device.
pub trait VideoStream: Send {
    /// Sensor this stream was opened with.
    fn facing(&self) -> FacingMode;

    /// Render the current video frame into a pixel buffer.
    fn grab_frame(&mut self) -> Result<DynamicImage, ScanError>;

    /// Release the underlying device. Called exactly once, by [`CameraHandle`].
    fn stop(&mut self) {}
}

/// A platform camera capability.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Open the sensor matching `facing`.
    ///
    /// # Errors
    /// [`ScanError::DeviceUnavailable`] when permission is denied, the
    /// hardware is missing, or the device is already held.
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn VideoStream>, ScanError>;
}

/// Owned handle to an open camera device; the device is released on drop.
pub struct CameraHandle {
    stream: Option<Box<dyn VideoStream>>,
    facing: FacingMode,
    progress: Option<ProgressCallback>,
}

impl CameraHandle {
    /// Acquire `facing` from `backend`.
    pub async fn open<B: CameraBackend + ?Sized>(
        backend: &B,
        facing: FacingMode,
        progress: Option<ProgressCallback>,
    ) -> Result<Self, ScanError> {
        let stream = backend.acquire(facing).await?;
        info!("Camera acquired ({})", facing);
        Ok(Self {
            stream: Some(stream),
            facing,
            progress,
        })
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Grab the current frame and encode it.
    pub fn capture(
        &mut self,
        format: CaptureFormat,
        max_dimension: u32,
    ) -> Result<CapturedImage, ScanError> {
        let stream = self.stream.as_mut().ok_or(ScanError::NoActiveCamera)?;
        let frame = stream.grab_frame()?;
        encode_frame(&frame, format, max_dimension)
    }

    /// Release the device now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Camera released ({})", self.facing);
            if let Some(ref cb) = self.progress {
                cb.on_camera_released(self.facing.as_str());
            }
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("facing", &self.facing)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

// ── Still-frame camera ───────────────────────────────────────────────────

/// Where a [`StillFrameCamera`] sensor gets its picture from.
#[derive(Debug, Clone)]
pub enum FrameSource {
    /// An image file on disk (PNG or JPEG), read when the device is acquired.
    File(PathBuf),
    /// An already-decoded picture.
    Memory(DynamicImage),
}

/// A camera whose sensors each show a fixed picture.
///
/// Used by the CLI to feed a photographed invoice through the pipeline and by
/// tests to drive a session without hardware. Each facing mode is an
/// independent exclusive device: acquiring one that is already open fails
/// with [`ScanError::DeviceUnavailable`] until its stream is released.
#[derive(Debug, Clone, Default)]
pub struct StillFrameCamera {
    sources: HashMap<FacingMode, FrameSource>,
    open: Arc<Mutex<HashSet<FacingMode>>>,
}

impl StillFrameCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a picture to the sensor for `facing`.
    pub fn with_source(mut self, facing: FacingMode, source: FrameSource) -> Self {
        self.sources.insert(facing, source);
        self
    }

    /// Shorthand for a file-backed sensor.
    pub fn with_file(self, facing: FacingMode, path: impl Into<PathBuf>) -> Self {
        self.with_source(facing, FrameSource::File(path.into()))
    }

    /// Whether the device for `facing` is currently held by a stream.
    pub fn is_open(&self, facing: FacingMode) -> bool {
        self.open
            .lock()
            .map(|open| open.contains(&facing))
            .unwrap_or(false)
    }

    fn claim(&self, facing: FacingMode) -> Result<(), ScanError> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| ScanError::Internal("camera registry poisoned".into()))?;
        if !open.insert(facing) {
            return Err(ScanError::DeviceUnavailable {
                facing: facing.to_string(),
                reason: "device is already in use".into(),
            });
        }
        Ok(())
    }

    fn unclaim(open: &Mutex<HashSet<FacingMode>>, facing: FacingMode) {
        match open.lock() {
            Ok(mut open) => {
                open.remove(&facing);
            }
            Err(_) => warn!("Camera registry poisoned while releasing {}", facing),
        }
    }
}

#[async_trait]
impl CameraBackend for StillFrameCamera {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn VideoStream>, ScanError> {
        let source = self
            .sources
            .get(&facing)
            .cloned()
            .ok_or_else(|| ScanError::DeviceUnavailable {
                facing: facing.to_string(),
                reason: "no camera for this facing mode".into(),
            })?;

        self.claim(facing)?;

        let frame = match source {
            FrameSource::Memory(img) => Ok(img),
            FrameSource::File(path) => load_frame(path, facing).await,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                Self::unclaim(&self.open, facing);
                return Err(e);
            }
        };

        Ok(Box::new(StillFrameStream {
            facing,
            frame,
            open: Arc::clone(&self.open),
        }))
    }
}

/// Read and decode a sensor picture off the async executor.
async fn load_frame(path: PathBuf, facing: FacingMode) -> Result<DynamicImage, ScanError> {
    let unavailable = |reason: String| ScanError::DeviceUnavailable {
        facing: facing.to_string(),
        reason,
    };

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => unavailable(format!("'{}' not found", path.display())),
        std::io::ErrorKind::PermissionDenied => {
            unavailable(format!("permission denied reading '{}'", path.display()))
        }
        _ => unavailable(format!("cannot read '{}': {}", path.display(), e)),
    })?;

    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ScanError::Internal(format!("Decode task panicked: {}", e)))?;

    let frame = decoded.map_err(|e| unavailable(format!("'{}' is not an image: {}", path.display(), e)))?;
    debug!(
        "Loaded {}x{} frame for {} from {}",
        frame.width(),
        frame.height(),
        facing,
        path.display()
    );
    Ok(frame)
}

struct StillFrameStream {
    facing: FacingMode,
    frame: DynamicImage,
    open: Arc<Mutex<HashSet<FacingMode>>>,
}

impl VideoStream for StillFrameStream {
    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn grab_frame(&mut self) -> Result<DynamicImage, ScanError> {
        Ok(self.frame.clone())
    }

    fn stop(&mut self) {
        StillFrameCamera::unclaim(&self.open, self.facing);
    }
}
