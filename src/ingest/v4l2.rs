//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates RGB24 at the
//! configured size and frame rate, and captures through an mmap stream.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use crate::config::CameraSettings;
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

pub(super) struct V4l2Camera {
    settings: CameraSettings,
    state: Option<V4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(super) fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
        }
    }

    pub(super) fn describe(&self) -> String {
        format!(
            "{} ({}x{})",
            self.settings.device, self.active_width, self.active_height
        )
    }

    pub(super) fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = device
            .set_format(&format)
            .with_context(|| format!("set RGB24 format on {}", self.settings.device))?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!(
                "v4l2 device {} does not support RGB24 (negotiated {})",
                self.settings.device,
                format.fourcc
            );
        }

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "Camera: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "Camera: opened {} ({}x{})",
            self.settings.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    pub(super) fn capture(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let expected = self.active_width as usize * self.active_height as usize * 3;
        if pixels.len() < expected {
            anyhow::bail!(
                "short v4l2 frame: expected {} bytes, got {}",
                expected,
                pixels.len()
            );
        }

        self.frame_count += 1;
        let mut pixels = pixels;
        pixels.truncate(expected);
        Ok(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        ))
    }

    pub(super) fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("Camera: released {}", self.settings.device);
        }
    }
}
