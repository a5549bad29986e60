use anyhow::Result;
use rand::Rng;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Frames without a vehicle before and after each approach.
const APPROACH_EMPTY_FRAMES: usize = 60;
/// Frames over which the vehicle grows from far to near.
const APPROACH_FRAMES: usize = 120;
const APPROACH_MIN_WIDTH_PX: f64 = 20.0;
const APPROACH_CONFIDENCE: f32 = 0.8;

/// Replays a fixed detection script, one entry per frame, cyclically.
///
/// Used in place of a model for bench runs and tests. An empty script
/// reports no detections.
pub struct ScriptedBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    jitter_px: f64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            jitter_px: 0.0,
        }
    }

    /// Same detections on every frame.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::new(vec![detections])
    }

    /// A front-view car that enters far away, closes in until its box covers
    /// most of the frame, then leaves.
    pub fn approaching_vehicle(frame_width: u32, frame_height: u32) -> Self {
        let frame_width = frame_width as f64;
        let center_y = frame_height as f64 / 2.0;
        let max_width = (frame_width * 0.6).max(APPROACH_MIN_WIDTH_PX + 1.0);
        let mut script = vec![Vec::new(); APPROACH_EMPTY_FRAMES];
        for step in 0..APPROACH_FRAMES {
            let progress = step as f64 / (APPROACH_FRAMES - 1) as f64;
            let width = APPROACH_MIN_WIDTH_PX + progress * (max_width - APPROACH_MIN_WIDTH_PX);
            let xmin = (frame_width - width) / 2.0;
            let half_height = width * 0.4;
            script.push(vec![Detection::new(
                "full_front_view_car",
                BoundingBox::new(
                    xmin,
                    center_y - half_height,
                    xmin + width,
                    center_y + half_height,
                ),
                APPROACH_CONFIDENCE,
            )]);
        }
        Self::new(script).with_jitter(2.0)
    }

    /// Add uniform noise of up to `px` pixels to each box edge.
    pub fn with_jitter(mut self, px: f64) -> Self {
        self.jitter_px = px.max(0.0);
        self
    }

    pub fn script_len(&self) -> usize {
        self.script.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let mut detections = self.script[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.script.len();

        if self.jitter_px > 0.0 {
            let mut rng = rand::thread_rng();
            for detection in &mut detections {
                detection.bbox.xmin += rng.gen_range(-self.jitter_px..=self.jitter_px);
                detection.bbox.xmax += rng.gen_range(-self.jitter_px..=self.jitter_px);
            }
        }
        Ok(detections)
    }
}
