//! Conversion of raw grab results into interleaved BGR8 frames.

use gencam_hw::{GrabResult, GrabStatus, PixelFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("grab result did not succeed")]
    FailedGrab,
    #[error("{format:?} buffer too short: expected {expected}, got {actual}")]
    BufferTooShort {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported pixel format {0:?}")]
    Unsupported(PixelFormat),
}

/// Which end of the transport container carries the significant bits of a
/// deep pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitAlignment {
    #[default]
    MsbAligned,
    LsbAligned,
}

/// A decoded 8-bit-per-channel interleaved BGR frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// `width * height * 3` bytes, B-G-R order.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Channel-swapped copy of the pixel data, R-G-B order.
    pub fn to_rgb8(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect()
    }
}

/// Stateless converter from raw sensor layouts to BGR8. Reusable across any
/// number of grab results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Converter {
    alignment: BitAlignment,
}

impl Converter {
    /// Converter producing 8-bit interleaved BGR with MSB-aligned packing.
    pub fn bgr8() -> Converter {
        Converter {
            alignment: BitAlignment::MsbAligned,
        }
    }

    pub fn with_alignment(alignment: BitAlignment) -> Converter {
        Converter { alignment }
    }

    /// Decode a completed grab into a BGR8 frame.
    ///
    /// A failed grab is rejected with [`ConvertError::FailedGrab`]; check
    /// [`GrabResult::succeeded`] first when the failure itself matters.
    pub fn convert(&self, grab: &GrabResult) -> Result<Frame, ConvertError> {
        let GrabStatus::Complete {
            data,
            width,
            height,
            format,
        } = grab.status()
        else {
            return Err(ConvertError::FailedGrab);
        };

        let pixels = *width as usize * *height as usize;
        let expected = pixels * format.bytes_per_pixel();
        if data.len() < expected {
            return Err(ConvertError::BufferTooShort {
                format: *format,
                expected,
                actual: data.len(),
            });
        }
        let data = &data[..expected];

        let mut bgr = Vec::with_capacity(pixels * 3);
        match format {
            PixelFormat::Mono8 => {
                for &v in data {
                    bgr.extend_from_slice(&[v, v, v]);
                }
            }
            PixelFormat::Mono16 => {
                for pair in data.chunks_exact(2) {
                    let value = u16::from_le_bytes([pair[0], pair[1]]);
                    let v = match self.alignment {
                        BitAlignment::MsbAligned => (value >> 8) as u8,
                        BitAlignment::LsbAligned => (value & 0xFF) as u8,
                    };
                    bgr.extend_from_slice(&[v, v, v]);
                }
            }
            PixelFormat::Rgb8 => {
                for rgb in data.chunks_exact(3) {
                    bgr.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]);
                }
            }
            PixelFormat::Bgr8 => bgr.extend_from_slice(data),
            PixelFormat::Yuyv => {
                // [Y0, U, Y1, V] covers two pixels.
                for quad in data.chunks_exact(4) {
                    let (u, v) = (quad[1], quad[3]);
                    bgr.extend_from_slice(&yuv_to_bgr(quad[0], u, v));
                    bgr.extend_from_slice(&yuv_to_bgr(quad[2], u, v));
                }
            }
            // Demosaicing is out of scope for this layer.
            PixelFormat::BayerRg8 => return Err(ConvertError::Unsupported(*format)),
        }

        Ok(Frame {
            data: bgr,
            width: *width,
            height: *height,
        })
    }
}

/// BT.601 integer YUV to BGR.
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    let r = clamp((298 * c + 409 * e + 128) >> 8);
    let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp((298 * c + 516 * d + 128) >> 8);
    [b, g, r]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gencam_hw::{BufferLease, GrabResult, GrabStatus};

    fn grab(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> GrabResult {
        GrabResult::new(
            GrabStatus::Complete {
                data,
                width,
                height,
                format,
            },
            BufferLease::detached(),
        )
    }

    #[test]
    fn test_mono8_replicates_channels() {
        let frame = Converter::bgr8()
            .convert(&grab(vec![0, 128, 255], 3, 1, PixelFormat::Mono8))
            .unwrap();
        assert_eq!(frame.data, vec![0, 0, 0, 128, 128, 128, 255, 255, 255]);
        assert_eq!((frame.width, frame.height), (3, 1));
    }

    #[test]
    fn test_mono16_msb_takes_high_byte() {
        // LE 0xAB40 -> high byte 0xAB.
        let frame = Converter::bgr8()
            .convert(&grab(vec![0x40, 0xAB], 1, 1, PixelFormat::Mono16))
            .unwrap();
        assert_eq!(frame.data, vec![0xAB, 0xAB, 0xAB]);
    }

    #[test]
    fn test_mono16_lsb_takes_low_byte() {
        let converter = Converter::with_alignment(BitAlignment::LsbAligned);
        let frame = converter
            .convert(&grab(vec![0x40, 0xAB], 1, 1, PixelFormat::Mono16))
            .unwrap();
        assert_eq!(frame.data, vec![0x40, 0x40, 0x40]);
    }

    #[test]
    fn test_rgb8_reorders() {
        let frame = Converter::bgr8()
            .convert(&grab(vec![10, 20, 30], 1, 1, PixelFormat::Rgb8))
            .unwrap();
        assert_eq!(frame.data, vec![30, 20, 10]);
    }

    #[test]
    fn test_bgr8_passthrough() {
        let frame = Converter::bgr8()
            .convert(&grab(vec![30, 20, 10], 1, 1, PixelFormat::Bgr8))
            .unwrap();
        assert_eq!(frame.data, vec![30, 20, 10]);
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // Y = 82 with U = V = 128 is an achromatic pixel.
        let frame = Converter::bgr8()
            .convert(&grab(vec![82, 128, 82, 128], 2, 1, PixelFormat::Yuyv))
            .unwrap();
        let [b, g, r] = [frame.data[0], frame.data[1], frame.data[2]];
        assert_eq!(b, g);
        assert_eq!(g, r);
        // (298 * (82 - 16) + 128) >> 8 = 77.
        assert_eq!(b, 77);
    }

    #[test]
    fn test_yuyv_full_range_clamps() {
        let frame = Converter::bgr8()
            .convert(&grab(vec![255, 0, 0, 255], 2, 1, PixelFormat::Yuyv))
            .unwrap();
        assert!(frame.data.iter().all(|&v| v <= 255));
        assert_eq!(frame.data.len(), 6);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = Converter::bgr8()
            .convert(&grab(vec![1, 2], 2, 2, PixelFormat::Mono8))
            .unwrap_err();
        assert!(matches!(err, ConvertError::BufferTooShort { expected: 4, actual: 2, .. }));
    }

    #[test]
    fn test_failed_grab_rejected() {
        let failed = GrabResult::new(
            GrabStatus::Failed {
                code: -1,
                description: "incomplete".into(),
            },
            BufferLease::detached(),
        );
        assert!(matches!(
            Converter::bgr8().convert(&failed),
            Err(ConvertError::FailedGrab)
        ));
    }

    #[test]
    fn test_bayer_unsupported() {
        let err = Converter::bgr8()
            .convert(&grab(vec![0; 4], 2, 2, PixelFormat::BayerRg8))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported(PixelFormat::BayerRg8)));
    }
}
