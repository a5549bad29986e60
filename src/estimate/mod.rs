//! Per-frame distance estimation and windowed aggregation.
//!
//! A frame's detections reduce to one [`DistanceSample`] (nearest object, or
//! the no-object sentinel). [`WindowAggregator`] batches N samples, rejects
//! outliers and yields one [`WindowSummary`] per window.

mod distance;
mod window;

pub use distance::{DistanceEstimator, DistanceSample, FrameDistanceReducer, NO_OBJECT_DISTANCE_M};
pub use window::{summarize, OutlierFilter, WindowAggregator, WindowSummary};
