//! gencam-core — Thin control facade for machine-vision cameras.
//!
//! Opens a device, applies a feature file onto its node map, runs
//! latest-frame-only acquisition, converts raw grabs to BGR8, captures
//! single frames (optionally straight to PNG), and drives the sensor's
//! region of interest. Backends plug in through
//! [`gencam_hw::CameraDevice`].

pub mod capture;
pub mod convert;
pub mod roi;
pub mod session;

pub use capture::{CaptureError, RETRIEVE_TIMEOUT};
pub use convert::{BitAlignment, ConvertError, Converter, Frame};
pub use roi::Roi;
pub use session::Camera;

pub use gencam_hw::{DeviceError, DeviceInfo};

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use gencam_hw::SimCamera;

    use crate::Camera;

    pub(crate) fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Session over a fresh simulated camera, plus its lease counter.
    pub(crate) fn sim_camera(config: &str) -> (Camera, Arc<AtomicUsize>) {
        sim_camera_with(config, |_| {})
    }

    pub(crate) fn sim_camera_with(
        config: &str,
        tweak: impl FnOnce(&mut SimCamera),
    ) -> (Camera, Arc<AtomicUsize>) {
        let mut sim = SimCamera::new();
        tweak(&mut sim);
        let leases = sim.lease_counter();
        let file = config_file(config);
        let camera = Camera::with_device(Box::new(sim), file.path()).unwrap();
        (camera, leases)
    }
}
