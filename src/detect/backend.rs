use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector seam.
///
/// Inference itself is opaque to the pipeline: a backend receives a frame and
/// returns zero or more `(label, bbox, confidence)` detections in frame pixel
/// coordinates. Confidence filtering happens downstream, so backends should
/// report every candidate with a score in `(0, 1]`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
