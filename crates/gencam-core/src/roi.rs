//! Region-of-interest control over the device's geometry nodes.

use gencam_hw::device::{HEIGHT, OFFSET_X, OFFSET_Y, WIDTH};
use gencam_hw::DeviceError;

use crate::session::Camera;

/// Rectangular sensor readout region, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub width: i64,
    pub height: i64,
    pub offset_x: i64,
    pub offset_y: i64,
}

impl Camera {
    /// Set the capture region.
    ///
    /// Width and height are written unconditionally; each offset is written
    /// only while the device reports it writable (offsets are commonly
    /// locked by auto-centering or while streaming) and left untouched
    /// otherwise. A rejected write — out of range, misaligned — propagates
    /// as a device configuration error.
    pub fn set_roi(&mut self, roi: Roi) -> Result<(), DeviceError> {
        // Dimensions before offsets; the device validates offsets against
        // the dimensions already in place.
        self.device_mut().set_feature(WIDTH, roi.width)?;
        self.device_mut().set_feature(HEIGHT, roi.height)?;

        for (name, value) in [(OFFSET_X, roi.offset_x), (OFFSET_Y, roi.offset_y)] {
            if self.device().feature(name)?.writable {
                self.device_mut().set_feature(name, value)?;
            } else {
                tracing::debug!(feature = name, "offset not writable, leaving as-is");
            }
        }
        Ok(())
    }

    /// Grow the capture region to the full sensor.
    ///
    /// Offsets move to their reported minimum first so the grown dimensions
    /// never combine with a stale offset into an out-of-bounds region; only
    /// then do width and height go to their reported maximum.
    pub fn max_roi(&mut self) -> Result<(), DeviceError> {
        for name in [OFFSET_X, OFFSET_Y] {
            let info = self.device().feature(name)?;
            if info.writable {
                self.device_mut().set_feature(name, info.min)?;
            }
        }

        let width = self.device().feature(WIDTH)?;
        self.device_mut().set_feature(WIDTH, width.max)?;
        let height = self.device().feature(HEIGHT)?;
        self.device_mut().set_feature(HEIGHT, height.max)?;
        Ok(())
    }

    /// Live query of the current capture region.
    pub fn roi(&self) -> Result<Roi, DeviceError> {
        Ok(Roi {
            width: self.device().feature(WIDTH)?.value,
            height: self.device().feature(HEIGHT)?.value,
            offset_x: self.device().feature(OFFSET_X)?.value,
            offset_y: self.device().feature(OFFSET_Y)?.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sim_camera;

    #[test]
    fn test_set_roi_round_trips() {
        let (mut camera, _) = sim_camera("");
        let roi = Roi {
            width: 640,
            height: 480,
            offset_x: 100,
            offset_y: 50,
        };
        camera.set_roi(roi).unwrap();
        assert_eq!(camera.roi().unwrap(), roi);
    }

    #[test]
    fn test_set_roi_skips_locked_offsets() {
        // CenterX = 1 locks OffsetX to the centered position.
        let (mut camera, _) = sim_camera("[features]\nCenterX = 1\n");
        camera
            .set_roi(Roi {
                width: 640,
                height: 480,
                offset_x: 0,
                offset_y: 120,
            })
            .unwrap();

        let roi = camera.roi().unwrap();
        assert_eq!(roi.offset_x, (1920 - 640) / 2);
        assert_eq!(roi.offset_y, 120);
    }

    #[test]
    fn test_set_roi_rejects_out_of_bounds() {
        let (mut camera, _) = sim_camera("");
        let err = camera
            .set_roi(Roi {
                width: 640,
                height: 480,
                offset_x: 1920,
                offset_y: 0,
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::FeatureRejected { .. }));
    }

    #[test]
    fn test_set_roi_rejects_misaligned_width() {
        let (mut camera, _) = sim_camera("");
        assert!(camera
            .set_roi(Roi {
                width: 641,
                height: 480,
                offset_x: 0,
                offset_y: 0,
            })
            .is_err());
    }

    #[test]
    fn test_max_roi_from_shifted_region() {
        let (mut camera, _) = sim_camera(
            "[features]\nWidth = 320\nHeight = 240\nOffsetX = 800\nOffsetY = 600\n",
        );
        camera.max_roi().unwrap();
        assert_eq!(
            camera.roi().unwrap(),
            Roi {
                width: 1920,
                height: 1200,
                offset_x: 0,
                offset_y: 0,
            }
        );
    }

    #[test]
    fn test_max_roi_is_idempotent() {
        let (mut camera, _) = sim_camera("");
        camera.max_roi().unwrap();
        camera.max_roi().unwrap();
        assert_eq!(camera.roi().unwrap().width, 1920);
    }

    #[test]
    fn test_max_roi_with_centered_offsets() {
        let (mut camera, _) = sim_camera("[features]\nWidth = 640\nCenterX = 1\n");
        camera.max_roi().unwrap();
        let roi = camera.roi().unwrap();
        // A locked offset stays under device control; centering a full-width
        // region lands it at zero.
        assert_eq!(roi.width, 1920);
        assert_eq!(roi.offset_x, 0);
    }
}
