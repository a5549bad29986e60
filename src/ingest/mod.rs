//! Frame acquisition.
//!
//! - `CaptureDevice`: the seam between a camera and the acquisition thread.
//! - `Camera`: synthetic (`stub://`) or V4L2 (feature: ingest-v4l2) device.
//! - `FrameSource`: owns a device on a dedicated thread and publishes the
//!   latest frame into a `FrameSlot`.

use anyhow::Result;

use crate::frame::Frame;

mod camera;
mod source;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::Camera;
pub use source::{CaptureStats, FrameSource};

/// A camera that can be driven from the acquisition thread.
///
/// `open` failures are fatal to the caller. `capture` failures are treated
/// as transient: the acquisition loop logs them and tries again.
pub trait CaptureDevice: Send + 'static {
    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn capture(&mut self) -> Result<Frame>;

    /// Release the underlying device. Called once, from the acquisition thread.
    fn release(&mut self) {}
}
