//! Rear-vehicle proximity warner
//!
//! Estimates the distance to vehicles approaching from behind using a
//! camera feed and drives a three-level warning light over a wireless link.
//!
//! # Pipeline
//!
//! 1. `ingest`: a dedicated thread captures frames into a single-slot mailbox.
//! 2. `detect`: an opaque detector turns a frame into `(label, bbox, score)`.
//! 3. `estimate`: pinhole distance per detection, nearest object per frame,
//!    then a window of N frames with outlier rejection.
//! 4. `alert`: RED below 25 m, YELLOW below 50 m, GREEN otherwise.
//! 5. `link`: one byte per window to the LED controller, whose session is
//!    supervised and re-established on loss.
//!
//! # Module Structure
//!
//! - `config`: the immutable process configuration (focal length, size table,
//!   thresholds, window, camera, detector, link)
//! - `error`: classified pipeline failures
//! - `frame`: frames and the latest-frame mailbox
//! - `pipeline`: the orchestration loop
//! - `telemetry`: optional JSON record of transmitted alerts

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod estimate;
pub mod frame;
pub mod ingest;
pub mod link;
pub mod pipeline;
pub mod telemetry;

pub use alert::{AlertLevel, AlertMapper};
pub use config::{FocalLength, ProximityConfig, SizeTable};
pub use detect::{build_detector, BoundingBox, Detection, DetectorBackend, ScriptedBackend};
pub use error::PipelineError;
pub use estimate::{
    DistanceEstimator, DistanceSample, FrameDistanceReducer, OutlierFilter, WindowAggregator,
    WindowSummary, NO_OBJECT_DISTANCE_M,
};
pub use frame::{Frame, FrameSlot};
pub use ingest::{Camera, CaptureDevice, FrameSource};
pub use link::{
    build_link_backend, AlertTransmitter, Health, LinkBackend, LinkHandle, LinkState,
    LinkSupervisor, PeerSession, SimulatedLink,
};
pub use pipeline::{Pipeline, PipelineStats, WindowOutcome};
pub use telemetry::TelemetryLog;
