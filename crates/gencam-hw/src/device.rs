//! The camera device boundary: a typed surface over a vendor capture stack.
//!
//! Everything above this trait (session handling, capture, ROI logic) is
//! backend-agnostic; everything below it talks to real or simulated hardware.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Standard geometry node names (GenICam SFNC vocabulary).
pub const WIDTH: &str = "Width";
pub const HEIGHT: &str = "Height";
pub const OFFSET_X: &str = "OffsetX";
pub const OFFSET_Y: &str = "OffsetY";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no camera device found")]
    NoDevice,
    #[error("device busy: {0}")]
    Busy(String),
    #[error("acquisition not started")]
    NotStreaming,
    #[error("acquisition already started")]
    AlreadyStreaming,
    #[error("timed out after {0:?} waiting for a frame")]
    Timeout(Duration),
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("feature {name} rejected value {value}: {reason}")]
    FeatureRejected {
        name: String,
        value: i64,
        reason: String,
    },
    #[error("failed to apply feature file {path}: {reason}")]
    FeatureLoad { path: String, reason: String },
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("device fault {code}: {description}")]
    Fault { code: i32, description: String },
    #[error("i/o error: {0}")]
    Io(String),
}

/// Info about an attached capture device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub model: String,
    pub driver: String,
    pub bus: String,
}

/// Live snapshot of one integer node: value, bounds, increment, writability.
///
/// Bounds are queried from the device's *current* state; on most sensors the
/// maximum of one geometry node shrinks as another grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureInfo {
    pub value: i64,
    pub min: i64,
    pub max: i64,
    pub inc: i64,
    pub writable: bool,
}

/// Raw sensor pixel layouts a backend may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Rgb8,
    Bgr8,
    /// Packed YUV 4:2:2, two pixels per four bytes.
    Yuyv,
    /// Bayer RGGB mosaic, one byte per photosite.
    BayerRg8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 | PixelFormat::BayerRg8 => 1,
            PixelFormat::Mono16 | PixelFormat::Yuyv => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    pub fn parse(name: &str) -> Option<PixelFormat> {
        match name {
            "Mono8" => Some(PixelFormat::Mono8),
            "Mono16" => Some(PixelFormat::Mono16),
            "Rgb8" => Some(PixelFormat::Rgb8),
            "Bgr8" => Some(PixelFormat::Bgr8),
            "Yuyv" => Some(PixelFormat::Yuyv),
            "BayerRg8" => Some(PixelFormat::BayerRg8),
            _ => None,
        }
    }
}

/// Buffering policy for continuous acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrabStrategy {
    /// Surface only the most recently completed frame; older undelivered
    /// frames are discarded. Bounded staleness when consumers lag.
    #[default]
    LatestFrameOnly,
    /// Deliver frames in completion order.
    OneByOne,
}

/// Scoped ownership of one device buffer.
///
/// A counted lease increments `outstanding` on creation and decrements it on
/// drop, so a buffer is returned to the device exactly once no matter which
/// path releases it.
#[derive(Debug)]
pub struct BufferLease(Option<Arc<AtomicUsize>>);

impl BufferLease {
    /// Lease with no accounting, for backends that copy out of the driver
    /// queue before returning.
    pub fn detached() -> Self {
        BufferLease(None)
    }

    pub fn counted(outstanding: Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        BufferLease(Some(outstanding))
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(outstanding) = self.0.take() {
            outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Outcome of one frame-acquisition attempt.
#[derive(Debug)]
pub enum GrabStatus {
    Complete {
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Failed { code: i32, description: String },
}

/// One completed (or failed) grab, holding its buffer lease for the lifetime
/// of the result. Dropping the result releases the buffer.
#[derive(Debug)]
pub struct GrabResult {
    status: GrabStatus,
    _lease: BufferLease,
}

impl GrabResult {
    pub fn new(status: GrabStatus, lease: BufferLease) -> Self {
        GrabResult {
            status,
            _lease: lease,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, GrabStatus::Complete { .. })
    }

    pub fn status(&self) -> &GrabStatus {
        &self.status
    }

    /// Error code and description for a failed grab.
    pub fn error(&self) -> Option<(i32, &str)> {
        match &self.status {
            GrabStatus::Failed { code, description } => Some((*code, description.as_str())),
            GrabStatus::Complete { .. } => None,
        }
    }
}

/// Feature file: node values exported by a configuration tool, applied onto a
/// device's node map as a unit. The format belongs to this layer; callers
/// above the trait only ever hand over a path.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFile {
    /// Optional pixel layout request (`"Mono8"`, `"Bgr8"`, ...).
    #[serde(default)]
    pub pixel_format: Option<String>,
    /// Integer node values by name.
    #[serde(default)]
    pub features: BTreeMap<String, i64>,
}

impl FeatureFile {
    pub fn load(path: &Path) -> Result<FeatureFile, DeviceError> {
        let text = std::fs::read_to_string(path).map_err(|e| DeviceError::FeatureLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| DeviceError::FeatureLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// One open camera. Exactly one session per value; dropping it releases the
/// device. Callers serialize access through `&mut self` — no internal locking.
pub trait CameraDevice {
    fn info(&self) -> &DeviceInfo;

    /// Live-query a named integer node.
    fn feature(&self, name: &str) -> Result<FeatureInfo, DeviceError>;

    /// Write a named integer node. Rejected values (range, alignment, lock
    /// state) come back as [`DeviceError::FeatureRejected`].
    fn set_feature(&mut self, name: &str, value: i64) -> Result<(), DeviceError>;

    /// Apply a feature file onto the node map. Values that fail validation
    /// fail the whole load; a backend may skip nodes its driver cannot
    /// represent, logging each one.
    fn load_features(&mut self, path: &Path) -> Result<(), DeviceError>;

    fn start_streaming(&mut self, strategy: GrabStrategy) -> Result<(), DeviceError>;

    fn stop_streaming(&mut self) -> Result<(), DeviceError>;

    fn streaming(&self) -> bool;

    /// Block up to `timeout` for the next grab. A frame the device reports as
    /// bad is an `Ok` result carrying [`GrabStatus::Failed`]; timeouts and
    /// lower-level faults are `Err`.
    fn retrieve(&mut self, timeout: Duration) -> Result<GrabResult, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_counting() {
        let outstanding = Arc::new(AtomicUsize::new(0));
        let lease = BufferLease::counted(outstanding.clone());
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);
        drop(lease);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detached_lease_is_inert() {
        // Must not panic or underflow anything.
        drop(BufferLease::detached());
    }

    #[test]
    fn test_grab_result_releases_on_drop() {
        let outstanding = Arc::new(AtomicUsize::new(0));
        let grab = GrabResult::new(
            GrabStatus::Failed {
                code: 0xE1001014u32 as i32,
                description: "incomplete frame".into(),
            },
            BufferLease::counted(outstanding.clone()),
        );
        assert!(!grab.succeeded());
        assert_eq!(grab.error().map(|(c, _)| c), Some(0xE1001014u32 as i32));
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);
        drop(grab);
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_feature_file_parse() {
        let file: FeatureFile = toml::from_str(
            r#"
            pixel_format = "Mono8"

            [features]
            Width = 1280
            Height = 720
            ExposureTime = 5000
            "#,
        )
        .unwrap();
        assert_eq!(file.pixel_format.as_deref(), Some("Mono8"));
        assert_eq!(file.features.get("Width"), Some(&1280));
        assert_eq!(file.features.len(), 3);
    }

    #[test]
    fn test_feature_file_defaults() {
        let file: FeatureFile = toml::from_str("").unwrap();
        assert!(file.pixel_format.is_none());
        assert!(file.features.is_empty());
    }

    #[test]
    fn test_feature_file_missing_path() {
        let err = FeatureFile::load(Path::new("/nonexistent/cam.toml")).unwrap_err();
        assert!(matches!(err, DeviceError::FeatureLoad { .. }));
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!(PixelFormat::parse("Bgr8"), Some(PixelFormat::Bgr8));
        assert_eq!(PixelFormat::parse("Mono12"), None);
        assert_eq!(PixelFormat::Yuyv.bytes_per_pixel(), 2);
    }
}
