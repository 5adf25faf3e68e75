//! Deterministic in-memory camera.
//!
//! Implements the full node-map semantics of a real area-scan sensor —
//! live geometry bounds, alignment increments, offset auto-centering,
//! streaming locks — so session, capture, and ROI logic can be exercised
//! without hardware. Frames are synthesized gradients keyed by a sequence
//! counter.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::device::{
    BufferLease, CameraDevice, DeviceError, DeviceInfo, FeatureFile, FeatureInfo, GrabResult,
    GrabStatus, GrabStrategy, PixelFormat, HEIGHT, OFFSET_X, OFFSET_Y, WIDTH,
};

const SENSOR_WIDTH: i64 = 1920;
const SENSOR_HEIGHT: i64 = 1200;

const CENTER_X: &str = "CenterX";
const CENTER_Y: &str = "CenterY";

#[derive(Debug, Clone, Copy)]
struct Node {
    value: i64,
    min: i64,
    max: i64,
    inc: i64,
}

impl Node {
    fn new(value: i64, min: i64, max: i64, inc: i64) -> Node {
        Node {
            value,
            min,
            max,
            inc,
        }
    }
}

/// Simulated camera device.
pub struct SimCamera {
    info: DeviceInfo,
    nodes: BTreeMap<String, Node>,
    pixel_format: PixelFormat,
    streaming: bool,
    sequence: u32,
    /// Synthetic inter-frame interval; retrieval times out when this exceeds
    /// the caller's timeout. Zero means frames are always ready.
    frame_period: Duration,
    pending_failure: Option<(i32, String)>,
    pending_fault: Option<String>,
    outstanding: Arc<AtomicUsize>,
}

impl SimCamera {
    pub fn new() -> SimCamera {
        let mut nodes = BTreeMap::new();
        nodes.insert(WIDTH.into(), Node::new(SENSOR_WIDTH, 64, SENSOR_WIDTH, 4));
        nodes.insert(HEIGHT.into(), Node::new(SENSOR_HEIGHT, 64, SENSOR_HEIGHT, 2));
        nodes.insert(OFFSET_X.into(), Node::new(0, 0, SENSOR_WIDTH, 2));
        nodes.insert(OFFSET_Y.into(), Node::new(0, 0, SENSOR_HEIGHT, 2));
        nodes.insert("ExposureTime".into(), Node::new(10_000, 20, 10_000_000, 1));
        nodes.insert("Gain".into(), Node::new(0, 0, 480, 1));
        nodes.insert(CENTER_X.into(), Node::new(0, 0, 1, 1));
        nodes.insert(CENTER_Y.into(), Node::new(0, 0, 1, 1));

        SimCamera {
            info: DeviceInfo {
                id: "sim0".into(),
                model: "simCAM-1920".into(),
                driver: "gencam-sim".into(),
                bus: "virtual".into(),
            },
            nodes,
            pixel_format: PixelFormat::Mono8,
            streaming: false,
            sequence: 0,
            frame_period: Duration::ZERO,
            pending_failure: None,
            pending_fault: None,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of unreturned buffer leases, for leak assertions.
    pub fn lease_counter(&self) -> Arc<AtomicUsize> {
        self.outstanding.clone()
    }

    pub fn outstanding_leases(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn set_frame_period(&mut self, period: Duration) {
        self.frame_period = period;
    }

    /// Make the next retrieve deliver a failed grab with this code/description.
    pub fn fail_next_grab(&mut self, code: i32, description: &str) {
        self.pending_failure = Some((code, description.to_string()));
    }

    /// Make the next retrieve fail with a low-level device fault.
    pub fn fault_next_retrieve(&mut self, description: &str) {
        self.pending_fault = Some(description.to_string());
    }

    fn raw(&self, name: &str) -> i64 {
        self.nodes[name].value
    }

    fn geometry_locked(&self) -> bool {
        self.streaming
    }

    /// Re-center one offset after its axis dimension changed, honoring the
    /// offset's increment.
    fn recenter(&mut self, offset: &str, span: i64, length: i64) {
        let node = &self.nodes[offset];
        let inc = node.inc;
        let centered = ((span - length) / 2 / inc) * inc;
        if let Some(node) = self.nodes.get_mut(offset) {
            node.value = centered.max(0);
        }
    }

    fn apply_centering(&mut self) {
        if self.raw(CENTER_X) == 1 {
            self.recenter(OFFSET_X, SENSOR_WIDTH, self.raw(WIDTH));
        }
        if self.raw(CENTER_Y) == 1 {
            self.recenter(OFFSET_Y, SENSOR_HEIGHT, self.raw(HEIGHT));
        }
    }

    fn reject(&self, name: &str, value: i64, reason: impl Into<String>) -> DeviceError {
        DeviceError::FeatureRejected {
            name: name.to_string(),
            value,
            reason: reason.into(),
        }
    }

    fn synthesize(&mut self) -> GrabStatus {
        let width = self.raw(WIDTH) as u32;
        let height = self.raw(HEIGHT) as u32;
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * self.pixel_format.bytes_per_pixel());
        let ramp = |x: u32, y: u32| (x.wrapping_add(y).wrapping_add(seq) & 0xFF) as u8;

        for y in 0..height {
            for x in 0..width {
                let v = ramp(x, y);
                match self.pixel_format {
                    PixelFormat::Mono8 | PixelFormat::BayerRg8 => data.push(v),
                    // 8 significant bits packed into the high byte, LE.
                    PixelFormat::Mono16 => data.extend_from_slice(&[0, v]),
                    PixelFormat::Rgb8 => {
                        data.extend_from_slice(&[v, (y & 0xFF) as u8, (seq & 0xFF) as u8])
                    }
                    PixelFormat::Bgr8 => {
                        data.extend_from_slice(&[(seq & 0xFF) as u8, (y & 0xFF) as u8, v])
                    }
                    // Neutral chroma: byte pairs [Y, U] then [Y, V], U = V = 128.
                    PixelFormat::Yuyv => data.extend_from_slice(&[v, 128]),
                }
            }
        }

        GrabStatus::Complete {
            data,
            width,
            height,
            format: self.pixel_format,
        }
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        SimCamera::new()
    }
}

impl CameraDevice for SimCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn feature(&self, name: &str) -> Result<FeatureInfo, DeviceError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| DeviceError::UnknownFeature(name.to_string()))?;

        let mut info = FeatureInfo {
            value: node.value,
            min: node.min,
            max: node.max,
            inc: node.inc,
            writable: true,
        };

        // Live geometry bounds: each axis max shrinks as its partner grows,
        // except under auto-centering, where the offset follows the
        // dimension and the full span is reachable.
        match name {
            WIDTH => {
                info.max = if self.raw(CENTER_X) == 1 {
                    SENSOR_WIDTH
                } else {
                    SENSOR_WIDTH - self.raw(OFFSET_X)
                };
                info.writable = !self.geometry_locked();
            }
            HEIGHT => {
                info.max = if self.raw(CENTER_Y) == 1 {
                    SENSOR_HEIGHT
                } else {
                    SENSOR_HEIGHT - self.raw(OFFSET_Y)
                };
                info.writable = !self.geometry_locked();
            }
            OFFSET_X => {
                info.max = SENSOR_WIDTH - self.raw(WIDTH);
                info.writable = !self.geometry_locked() && self.raw(CENTER_X) == 0;
            }
            OFFSET_Y => {
                info.max = SENSOR_HEIGHT - self.raw(HEIGHT);
                info.writable = !self.geometry_locked() && self.raw(CENTER_Y) == 0;
            }
            CENTER_X | CENTER_Y => {
                info.writable = !self.geometry_locked();
            }
            _ => {}
        }

        Ok(info)
    }

    fn set_feature(&mut self, name: &str, value: i64) -> Result<(), DeviceError> {
        let info = self.feature(name)?;

        if !info.writable {
            let reason = if self.geometry_locked() {
                "locked while streaming"
            } else {
                "auto-centering enabled"
            };
            return Err(self.reject(name, value, reason));
        }
        if value < info.min || value > info.max {
            return Err(self.reject(
                name,
                value,
                format!("out of range [{}, {}]", info.min, info.max),
            ));
        }
        if (value - info.min) % info.inc != 0 {
            return Err(self.reject(name, value, format!("not aligned to increment {}", info.inc)));
        }

        if let Some(node) = self.nodes.get_mut(name) {
            node.value = value;
        }
        self.apply_centering();
        Ok(())
    }

    fn load_features(&mut self, path: &Path) -> Result<(), DeviceError> {
        let load_err = |reason: String| DeviceError::FeatureLoad {
            path: path.display().to_string(),
            reason,
        };

        if self.streaming {
            return Err(load_err("cannot load features while streaming".into()));
        }

        let file = FeatureFile::load(path)?;

        let pixel_format = match &file.pixel_format {
            Some(name) => Some(
                PixelFormat::parse(name)
                    .ok_or_else(|| load_err(format!("unsupported pixel_format {name:?}")))?,
            ),
            None => None,
        };

        // Stage every node, then validate the map as a whole; a file is
        // applied entirely or not at all.
        let mut staged = self.nodes.clone();
        for (name, value) in &file.features {
            let node = staged
                .get_mut(name.as_str())
                .ok_or_else(|| load_err(format!("unknown feature {name}")))?;
            node.value = *value;
        }

        for (name, node) in &staged {
            if node.value < node.min || node.value > node.max {
                return Err(load_err(format!(
                    "{name} = {} out of range [{}, {}]",
                    node.value, node.min, node.max
                )));
            }
            if (node.value - node.min) % node.inc != 0 {
                return Err(load_err(format!(
                    "{name} = {} not aligned to increment {}",
                    node.value, node.inc
                )));
            }
        }
        if staged[WIDTH].value + staged[OFFSET_X].value > SENSOR_WIDTH
            || staged[HEIGHT].value + staged[OFFSET_Y].value > SENSOR_HEIGHT
        {
            return Err(load_err("region exceeds sensor bounds".into()));
        }

        self.nodes = staged;
        if let Some(format) = pixel_format {
            self.pixel_format = format;
        }
        self.apply_centering();

        tracing::info!(
            path = %path.display(),
            nodes = file.features.len(),
            "applied feature file"
        );
        Ok(())
    }

    fn start_streaming(&mut self, strategy: GrabStrategy) -> Result<(), DeviceError> {
        if self.streaming {
            return Err(DeviceError::AlreadyStreaming);
        }
        // Frames are synthesized on demand, so both strategies deliver the
        // newest possible frame; the distinction only matters for queueing
        // backends.
        tracing::debug!(?strategy, "sim streaming started");
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

    fn retrieve(&mut self, timeout: Duration) -> Result<GrabResult, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }
        if let Some(description) = self.pending_fault.take() {
            return Err(DeviceError::Fault {
                code: -3,
                description,
            });
        }
        if self.frame_period > timeout {
            return Err(DeviceError::Timeout(timeout));
        }

        let status = match self.pending_failure.take() {
            Some((code, description)) => GrabStatus::Failed { code, description },
            None => self.synthesize(),
        };
        Ok(GrabResult::new(
            status,
            BufferLease::counted(self.outstanding.clone()),
        ))
    }
}
