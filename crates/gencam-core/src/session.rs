//! Device session and acquisition control.

use std::path::Path;

use gencam_hw::{CameraDevice, DeviceError, DeviceInfo, GrabStrategy};

/// Handle to one open camera.
///
/// Owns the device session exclusively; access is serialized through
/// `&mut self` and there is no internal locking. Dropping the handle
/// releases the device.
pub struct Camera {
    device: Box<dyn CameraDevice>,
    grabbing: bool,
}

impl Camera {
    /// Open the first attached camera and apply the feature file at
    /// `config` onto its node map.
    ///
    /// Fails when no device is present or the file cannot be applied.
    #[cfg(feature = "v4l2")]
    pub fn open_first(config: impl AsRef<Path>) -> Result<Camera, DeviceError> {
        Camera::with_device(gencam_hw::first_camera()?, config)
    }

    /// Open a session over an explicit backend (simulated camera, a specific
    /// V4L2 path) and apply the feature file.
    pub fn with_device(
        mut device: Box<dyn CameraDevice>,
        config: impl AsRef<Path>,
    ) -> Result<Camera, DeviceError> {
        tracing::info!(model = %device.info().model, "using device");
        device.load_features(config.as_ref())?;
        Ok(Camera {
            device,
            grabbing: false,
        })
    }

    /// Re-apply a new feature file without reopening the device. On failure
    /// the session stays open.
    pub fn reconfigure(&mut self, config: impl AsRef<Path>) -> Result<(), DeviceError> {
        self.device.load_features(config.as_ref())
    }

    /// Begin continuous acquisition, surfacing only the most recently
    /// completed frame. Calling this while already grabbing is a warned
    /// no-op.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.grabbing {
            tracing::warn!("start() called while already grabbing");
            return Ok(());
        }
        self.device.start_streaming(GrabStrategy::LatestFrameOnly)?;
        self.grabbing = true;
        Ok(())
    }

    /// Halt acquisition and release acquisition resources. Calling this
    /// without a prior [`start`](Self::start) is a warned no-op.
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        if !self.grabbing {
            tracing::warn!("stop() called while not grabbing");
            return Ok(());
        }
        self.device.stop_streaming()?;
        self.grabbing = false;
        Ok(())
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    /// Release the device and consume the handle. Dropping the handle has
    /// the same effect; this form surfaces a failure to stop cleanly.
    pub fn close(mut self) -> Result<(), DeviceError> {
        if self.grabbing {
            self.device.stop_streaming()?;
            self.grabbing = false;
        }
        Ok(())
    }

    pub(crate) fn device(&self) -> &dyn CameraDevice {
        self.device.as_ref()
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn CameraDevice {
        self.device.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::sim_camera;
    use gencam_hw::DeviceError;

    #[test]
    fn test_open_applies_config() {
        let (camera, _) = sim_camera("[features]\nWidth = 640\nHeight = 480\n");
        assert_eq!(camera.device().feature("Width").unwrap().value, 640);
        assert_eq!(camera.device().feature("Height").unwrap().value, 480);
    }

    #[test]
    fn test_open_fails_on_bad_config() {
        let config = crate::testutil::config_file("[features]\nNoSuchNode = 1\n");
        let err = crate::Camera::with_device(
            Box::new(gencam_hw::SimCamera::new()),
            config.path(),
        )
        .err()
        .expect("load must fail");
        assert!(matches!(err, DeviceError::FeatureLoad { .. }));
    }

    #[test]
    fn test_reconfigure_without_reopen() {
        let (mut camera, _) = sim_camera("[features]\nWidth = 640\n");
        let next = crate::testutil::config_file("[features]\nWidth = 1280\n");
        camera.reconfigure(next.path()).unwrap();
        assert_eq!(camera.device().feature("Width").unwrap().value, 1280);
    }

    #[test]
    fn test_failed_reconfigure_keeps_session_open() {
        let (mut camera, _) = sim_camera("[features]\nWidth = 640\n");
        let bad = crate::testutil::config_file("[features]\nNoSuchNode = 1\n");
        assert!(camera.reconfigure(bad.path()).is_err());
        // Session still works.
        camera.start().unwrap();
        assert!(camera.is_grabbing());
    }

    #[test]
    fn test_double_start_is_noop() {
        let (mut camera, _) = sim_camera("");
        camera.start().unwrap();
        camera.start().unwrap();
        assert!(camera.is_grabbing());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let (mut camera, _) = sim_camera("");
        camera.stop().unwrap();
        assert!(!camera.is_grabbing());
    }

    #[test]
    fn test_close_while_grabbing() {
        let (mut camera, _) = sim_camera("");
        camera.start().unwrap();
        camera.close().unwrap();
    }
}
