//! Camera devices.
//!
//! `stub://` devices generate synthetic frames paced at the target frame rate.
//! Any other device path is opened through V4L2 when the `ingest-v4l2`
//! feature is enabled.

use anyhow::Result;
use rand::Rng;
use std::time::Duration;

use super::CaptureDevice;
use crate::config::CameraSettings;
use crate::frame::Frame;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Camera;

/// Camera selected from `CameraSettings::device`.
pub struct Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Camera),
}

impl Camera {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        if settings.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(settings.clone())),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(V4l2Camera::new(settings.clone())),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!(
                    "camera device {} requires the ingest-v4l2 feature",
                    settings.device
                )
            }
        }
    }
}

impl CaptureDevice for Camera {
    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(camera) => format!("{} (synthetic)", camera.settings.device),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.describe(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.open(),
        }
    }

    fn capture(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.capture(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.capture(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.release(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    settings: CameraSettings,
    frame_count: u64,
    open: bool,
}

impl SyntheticCamera {
    fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            open: false,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            anyhow::bail!(
                "synthetic camera {} has empty dimensions {}x{}",
                self.settings.device,
                self.settings.width,
                self.settings.height
            );
        }
        self.open = true;
        log::info!(
            "Camera: opened {} ({}x{} @ {} fps, synthetic)",
            self.settings.device,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        if !self.open {
            anyhow::bail!("synthetic camera {} is not open", self.settings.device);
        }
        if self.settings.target_fps > 0 {
            std::thread::sleep(Duration::from_millis(
                1000 / self.settings.target_fps as u64,
            ));
        }
        self.frame_count += 1;
        Ok(Frame::new(
            self.generate_pixels(),
            self.settings.width,
            self.settings.height,
            self.frame_count,
        ))
    }

    /// Horizontal gradient that drifts with the frame counter, plus sensor noise.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let pixel_count = width * self.settings.height as usize * 3;
        let mut rng = rand::thread_rng();
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let column = (i / 3) % width;
            let base = (column as u64 + self.frame_count) % 256;
            *pixel = (base as u8).wrapping_add(rng.gen_range(0..4));
        }
        pixels
    }

    fn release(&mut self) {
        self.open = false;
        log::info!("Camera: released {}", self.settings.device);
    }
}
