//! V4L2 camera backend via the `v4l` crate.
//!
//! Maps the node-map surface onto what a V4L2 capture device can actually do:
//! `Width`/`Height` ride on format negotiation (bounds probed once at open by
//! letting the driver clamp), offsets are reported non-writable (plain capture
//! has no readout offsets), and feature-file nodes with no V4L2 mapping are
//! skipped with a warning.

use std::path::Path;
use std::time::Duration;

use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::device::{
    BufferLease, CameraDevice, DeviceError, DeviceInfo, FeatureFile, FeatureInfo, GrabResult,
    GrabStatus, GrabStrategy, PixelFormat, HEIGHT, OFFSET_X, OFFSET_Y, WIDTH,
};

/// An open V4L2 capture device.
pub struct V4l2Camera {
    device: Device,
    info: DeviceInfo,
    width: u32,
    height: u32,
    min_width: u32,
    min_height: u32,
    max_width: u32,
    max_height: u32,
    format: PixelFormat,
    streaming: bool,
    buffers: u32,
}

pub(crate) fn fourcc_to_format(fourcc: FourCC) -> Option<PixelFormat> {
    if fourcc == FourCC::new(b"GREY") {
        Some(PixelFormat::Mono8)
    } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
        Some(PixelFormat::Mono16)
    } else if fourcc == FourCC::new(b"YUYV") {
        Some(PixelFormat::Yuyv)
    } else if fourcc == FourCC::new(b"RGB3") {
        Some(PixelFormat::Rgb8)
    } else if fourcc == FourCC::new(b"BGR3") {
        Some(PixelFormat::Bgr8)
    } else if fourcc == FourCC::new(b"RGGB") {
        Some(PixelFormat::BayerRg8)
    } else {
        None
    }
}

fn format_to_fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mono8 => FourCC::new(b"GREY"),
        PixelFormat::Mono16 => FourCC::new(b"Y16 "),
        PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        PixelFormat::Rgb8 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr8 => FourCC::new(b"BGR3"),
        PixelFormat::BayerRg8 => FourCC::new(b"RGGB"),
    }
}

fn io_err(context: &str, e: impl std::fmt::Display) -> DeviceError {
    DeviceError::Io(format!("{context}: {e}"))
}

impl V4l2Camera {
    /// Open a capture device by path (e.g. `/dev/video0`).
    pub fn open(device_path: &str) -> Result<V4l2Camera, DeviceError> {
        if !Path::new(device_path).exists() {
            return Err(DeviceError::NoDevice);
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                DeviceError::Busy(device_path.to_string())
            } else {
                io_err(device_path, e)
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| io_err("failed to query capabilities", e))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(DeviceError::Io(format!(
                "{device_path} does not support video capture"
            )));
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let (min_width, min_height, max_width, max_height) = Self::probe_bounds(&device)?;

        let fmt = device
            .format()
            .map_err(|e| io_err("failed to get format", e))?;
        let format = fourcc_to_format(fmt.fourcc)
            .ok_or_else(|| DeviceError::UnsupportedFormat(format!("{:?}", fmt.fourcc)))?;

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            "negotiated format"
        );

        Ok(V4l2Camera {
            info: DeviceInfo {
                id: device_path.to_string(),
                model: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            },
            device,
            width: fmt.width,
            height: fmt.height,
            min_width,
            min_height,
            max_width,
            max_height,
            format,
            streaming: false,
            buffers: 1,
        })
    }

    /// Open the first capture-capable device.
    pub fn first() -> Result<V4l2Camera, DeviceError> {
        let devices = enumerate();
        let first = devices.first().ok_or(DeviceError::NoDevice)?;
        V4l2Camera::open(&first.id)
    }

    /// Ask the driver to clamp extreme dimensions, recording the results as
    /// the geometry bounds, then restore the native format.
    fn probe_bounds(device: &Device) -> Result<(u32, u32, u32, u32), DeviceError> {
        let native = device
            .format()
            .map_err(|e| io_err("failed to get format", e))?;
        let (native_width, native_height) = (native.width, native.height);

        let mut fmt = native;
        fmt.width = 16384;
        fmt.height = 16384;
        let upper = device
            .set_format(&fmt)
            .map_err(|e| io_err("failed to probe max format", e))?;
        let (max_width, max_height) = (upper.width, upper.height);

        let mut fmt = upper;
        fmt.width = 1;
        fmt.height = 1;
        let lower = device
            .set_format(&fmt)
            .map_err(|e| io_err("failed to probe min format", e))?;
        let (min_width, min_height) = (lower.width, lower.height);

        let mut fmt = lower;
        fmt.width = native_width;
        fmt.height = native_height;
        device
            .set_format(&fmt)
            .map_err(|e| io_err("failed to restore format", e))?;

        Ok((min_width, min_height, max_width, max_height))
    }

    fn set_dimension(&mut self, name: &str, value: i64) -> Result<(), DeviceError> {
        let reject = |reason: &str| DeviceError::FeatureRejected {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };

        if self.streaming {
            return Err(reject("locked while streaming"));
        }
        if value <= 0 || value > u32::MAX as i64 {
            return Err(reject("out of range"));
        }

        let mut fmt = self
            .device
            .format()
            .map_err(|e| io_err("failed to get format", e))?;
        let requested = value as u32;
        match name {
            WIDTH => fmt.width = requested,
            _ => fmt.height = requested,
        }
        let negotiated = self
            .device
            .set_format(&fmt)
            .map_err(|e| io_err("failed to set format", e))?;

        let accepted = match name {
            WIDTH => negotiated.width,
            _ => negotiated.height,
        };
        if accepted != requested {
            // Back out the driver's counter-offer; a rejected write must not
            // change the node.
            let mut fmt = negotiated;
            fmt.width = self.width;
            fmt.height = self.height;
            let _ = self.device.set_format(&fmt);
            return Err(reject("driver negotiated a different size"));
        }

        self.width = negotiated.width;
        self.height = negotiated.height;
        Ok(())
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), DeviceError> {
        let fourcc = format_to_fourcc(format);
        let mut fmt = self
            .device
            .format()
            .map_err(|e| io_err("failed to get format", e))?;
        fmt.fourcc = fourcc;
        let negotiated = self
            .device
            .set_format(&fmt)
            .map_err(|e| io_err("failed to set format", e))?;

        if negotiated.fourcc != fourcc {
            tracing::warn!(
                requested = ?fourcc,
                negotiated = ?negotiated.fourcc,
                "driver kept its own pixel format"
            );
        }
        self.format = fourcc_to_format(negotiated.fourcc)
            .ok_or_else(|| DeviceError::UnsupportedFormat(format!("{:?}", negotiated.fourcc)))?;
        self.width = negotiated.width;
        self.height = negotiated.height;
        Ok(())
    }
}

impl CameraDevice for V4l2Camera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn feature(&self, name: &str) -> Result<FeatureInfo, DeviceError> {
        match name {
            WIDTH => Ok(FeatureInfo {
                value: self.width as i64,
                min: self.min_width as i64,
                max: self.max_width as i64,
                inc: 1,
                writable: !self.streaming,
            }),
            HEIGHT => Ok(FeatureInfo {
                value: self.height as i64,
                min: self.min_height as i64,
                max: self.max_height as i64,
                inc: 1,
                writable: !self.streaming,
            }),
            // Plain V4L2 capture reads the full frame; there is no readout
            // offset to move.
            OFFSET_X | OFFSET_Y => Ok(FeatureInfo {
                value: 0,
                min: 0,
                max: 0,
                inc: 1,
                writable: false,
            }),
            other => Err(DeviceError::UnknownFeature(other.to_string())),
        }
    }

    fn set_feature(&mut self, name: &str, value: i64) -> Result<(), DeviceError> {
        match name {
            WIDTH | HEIGHT => self.set_dimension(name, value),
            OFFSET_X | OFFSET_Y => Err(DeviceError::FeatureRejected {
                name: name.to_string(),
                value,
                reason: "not writable".to_string(),
            }),
            other => Err(DeviceError::UnknownFeature(other.to_string())),
        }
    }

    fn load_features(&mut self, path: &Path) -> Result<(), DeviceError> {
        let file = FeatureFile::load(path)?;

        if let Some(name) = &file.pixel_format {
            let format = PixelFormat::parse(name).ok_or_else(|| DeviceError::FeatureLoad {
                path: path.display().to_string(),
                reason: format!("unsupported pixel_format {name:?}"),
            })?;
            self.set_pixel_format(format)?;
        }

        for (name, value) in &file.features {
            match name.as_str() {
                WIDTH | HEIGHT => self.set_feature(name, *value)?,
                other => {
                    tracing::warn!(feature = other, "no V4L2 mapping, skipped");
                }
            }
        }

        tracing::info!(path = %path.display(), "applied feature file");
        Ok(())
    }

    fn start_streaming(&mut self, strategy: GrabStrategy) -> Result<(), DeviceError> {
        if self.streaming {
            return Err(DeviceError::AlreadyStreaming);
        }
        // A single mmap buffer leaves the driver nowhere to queue stale
        // frames, which is what latest-only means here.
        self.buffers = match strategy {
            GrabStrategy::LatestFrameOnly => 1,
            GrabStrategy::OneByOne => 4,
        };
        self.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }
        self.streaming = false;
        Ok(())
    }

    fn streaming(&self) -> bool {
        self.streaming
    }

    /// Dequeue one frame. The mmap dequeue blocks at driver pace; `timeout`
    /// is advisory on this backend.
    fn retrieve(&mut self, _timeout: Duration) -> Result<GrabResult, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }

        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, self.buffers)
            .map_err(|e| io_err("failed to create mmap stream", e))?;

        let (buf, meta) = stream.next().map_err(|e| DeviceError::Fault {
            code: e.raw_os_error().unwrap_or(-1),
            description: format!("failed to dequeue buffer: {e}"),
        })?;
        tracing::debug!(seq = meta.sequence, bytes = buf.len(), "dequeued frame");

        let expected =
            self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        let status = if buf.len() < expected {
            GrabStatus::Failed {
                code: -2,
                description: format!("short buffer: expected {expected}, got {}", buf.len()),
            }
        } else {
            GrabStatus::Complete {
                data: buf[..expected].to_vec(),
                width: self.width,
                height: self.height,
                format: self.format,
            }
        };

        // The data was copied out; the driver buffer requeues when the
        // stream drops, so the lease carries no accounting.
        Ok(GrabResult::new(status, BufferLease::detached()))
    }
}

/// List capture-capable `/dev/video*` devices.
pub fn enumerate() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            id: path,
            model: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping_round_trip() {
        for format in [
            PixelFormat::Mono8,
            PixelFormat::Yuyv,
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::BayerRg8,
        ] {
            assert_eq!(fourcc_to_format(format_to_fourcc(format)), Some(format));
        }
    }

    #[test]
    fn test_unknown_fourcc() {
        assert_eq!(fourcc_to_format(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            V4l2Camera::open("/dev/video-none"),
            Err(DeviceError::NoDevice)
        ));
    }
}
