//! gencam-hw — Hardware abstraction for machine-vision camera control.
//!
//! Defines the [`CameraDevice`] trait (the vendor-SDK boundary) together
//! with a V4L2 backend for real devices and a deterministic simulated
//! camera for tests and dry runs.

pub mod device;
pub mod sim;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{
    BufferLease, CameraDevice, DeviceError, DeviceInfo, FeatureInfo, GrabResult, GrabStatus,
    GrabStrategy, PixelFormat,
};
pub use sim::SimCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;

/// Open the first attached capture device.
#[cfg(feature = "v4l2")]
pub fn first_camera() -> Result<Box<dyn CameraDevice>, DeviceError> {
    Ok(Box::new(V4l2Camera::first()?))
}
