//! Single-frame capture: blocking retrieval, conversion, PNG encoding.

use std::path::Path;
use std::time::Duration;

use gencam_hw::{DeviceError, GrabResult, GrabStatus};
use thiserror::Error;

use crate::convert::{ConvertError, Converter, Frame};
use crate::session::Camera;

/// How long a retrieval blocks before giving up.
pub const RETRIEVE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("grab failed (code {code}): {description}")]
    Grab { code: i32, description: String },
    #[error(transparent)]
    Device(DeviceError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

impl From<DeviceError> for CaptureError {
    fn from(e: DeviceError) -> CaptureError {
        match e {
            DeviceError::Timeout(_) => CaptureError::Timeout,
            other => CaptureError::Device(other),
        }
    }
}

impl Camera {
    fn retrieve_one(&mut self) -> Result<GrabResult, CaptureError> {
        Ok(self.device_mut().retrieve(RETRIEVE_TIMEOUT)?)
    }

    /// Block up to [`RETRIEVE_TIMEOUT`] for one frame and decode it with
    /// `converter`.
    ///
    /// Grab failures surface the device's error code and description; neither
    /// they nor timeouts invalidate the session, so a capture loop may simply
    /// retry. The underlying buffer is released on every path.
    pub fn capture_one(&mut self, converter: &Converter) -> Result<Frame, CaptureError> {
        let grab = self.retrieve_one()?;
        match grab.status() {
            GrabStatus::Complete { .. } => Ok(converter.convert(&grab)?),
            GrabStatus::Failed { code, description } => {
                tracing::warn!(code, description = %description, "grab failed");
                Err(CaptureError::Grab {
                    code: *code,
                    description: description.clone(),
                })
            }
        }
        // `grab` drops here, returning its buffer to the device.
    }

    /// Capture one frame and encode it as PNG at `path`.
    ///
    /// The grab buffer is released before encoding so the device can reuse
    /// it for the next grab while the file is written.
    pub fn capture_png(&mut self, path: impl AsRef<Path>) -> Result<(), CaptureError> {
        let grab = self.retrieve_one()?;
        let frame = match grab.status() {
            GrabStatus::Complete { .. } => Converter::bgr8().convert(&grab)?,
            GrabStatus::Failed { code, description } => {
                tracing::warn!(code, description = %description, "grab failed");
                return Err(CaptureError::Grab {
                    code: *code,
                    description: description.clone(),
                });
            }
        };
        drop(grab);

        image::save_buffer_with_format(
            path.as_ref(),
            &frame.to_rgb8(),
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
            image::ImageFormat::Png,
        )?;
        tracing::info!(path = %path.as_ref().display(), width = frame.width, height = frame.height, "saved frame");
        Ok(())
    }
}
