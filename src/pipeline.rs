//! Main orchestration loop.
//!
//! Each iteration copies the latest frame out of the [`FrameSource`], runs
//! detection, reduces the frame to one distance sample and feeds the window.
//! Every N-th sample closes a window: the summary is classified and the
//! alert byte is dispatched. Link health is checked on its own cadence,
//! independent of the frame rate.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::alert::{AlertLevel, AlertMapper};
use crate::config::ProximityConfig;
use crate::detect::DetectorBackend;
use crate::estimate::{FrameDistanceReducer, WindowAggregator, WindowSummary};
use crate::frame::Frame;
use crate::ingest::{CaptureStats, FrameSource};
use crate::link::{AlertTransmitter, LinkBackend, LinkHandle, LinkState, LinkSupervisor};
use crate::telemetry::TelemetryLog;

/// Wait before polling again when no frame has been captured yet.
const NO_FRAME_PAUSE: Duration = Duration::from_millis(5);

/// Counters for one [`Pipeline::run`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    /// Iterations that re-read a frame already processed.
    pub duplicate_reads: u64,
    /// Frames dropped because a detection carried an unmapped label.
    pub frames_rejected: u64,
    pub detector_failures: u64,
    pub windows: u64,
    pub alerts_sent: u64,
    pub alerts_dropped: u64,
    pub last_distance_m: Option<f64>,
    pub last_level: Option<AlertLevel>,
    pub capture: CaptureStats,
}

/// What closing a window produced.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowOutcome {
    pub summary: WindowSummary,
    pub level: AlertLevel,
    /// Byte delivered to the controller, `None` if the write was dropped.
    pub sent: Option<u8>,
}

pub struct Pipeline<'a> {
    reducer: FrameDistanceReducer<'a>,
    window: WindowAggregator,
    mapper: AlertMapper,
    supervisor: LinkSupervisor,
    transmitter: AlertTransmitter,
    link: Option<LinkHandle>,
    telemetry: Option<TelemetryLog>,
    frame_limit: Option<u64>,
    startup_attempted: bool,
    last_sequence: Option<u64>,
    stats: PipelineStats,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ProximityConfig, link_backend: Box<dyn LinkBackend>) -> Self {
        Self {
            reducer: FrameDistanceReducer::from_settings(&config.estimation),
            window: WindowAggregator::new(
                config.estimation.window_size,
                config.estimation.outlier_filter,
            ),
            mapper: AlertMapper::new(config.alert),
            supervisor: LinkSupervisor::new(link_backend, &config.link),
            transmitter: AlertTransmitter::new(config.link.characteristic_uuid.clone()),
            link: None,
            telemetry: None,
            frame_limit: None,
            startup_attempted: false,
            last_sequence: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryLog) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Stop [`run`](Self::run) after this many processed frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }

    pub fn is_linked(&self) -> bool {
        self.link.as_ref().is_some_and(LinkHandle::is_connected)
    }

    /// Blocking startup connect. Returns whether a session is up.
    pub fn connect(&mut self, shutdown: &AtomicBool) -> bool {
        self.startup_attempted = true;
        self.link = self.supervisor.connect_until_ready(shutdown);
        self.link.is_some()
    }

    /// Run one frame through detection, reduction and the window. Returns
    /// the window outcome when this frame closed a window.
    ///
    /// Failures are contained to the frame: a detector error or an unmapped
    /// label is logged and the frame contributes no sample.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detector: &mut dyn DetectorBackend,
    ) -> Option<WindowOutcome> {
        if self.last_sequence == Some(frame.sequence) {
            self.stats.duplicate_reads += 1;
            log::debug!("frame {} read again", frame.sequence);
        }
        self.last_sequence = Some(frame.sequence);
        self.stats.frames_processed += 1;

        let detections = match detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detector_failures += 1;
                log::warn!("detector {} failed on frame {}: {:#}", detector.name(), frame.sequence, e);
                return None;
            }
        };

        let sample = match self.reducer.reduce(&detections) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.frames_rejected += 1;
                log::error!("frame {} rejected: {}", frame.sequence, e);
                return None;
            }
        };
        log::debug!("frame {}: {:.2} m", frame.sequence, sample.meters);

        let summary = self.window.push(sample)?;
        Some(self.close_window(summary, frame))
    }

    fn close_window(&mut self, summary: WindowSummary, frame: &Frame) -> WindowOutcome {
        let level = self.mapper.level(summary.distance_m);
        if summary.used_fallback {
            log::warn!("outlier filter retained nothing; using window mean {:.2} m", summary.mean_m);
        }
        log::info!(
            "window: {:.2} m -> {} ({}/{} retained, {} without object)",
            summary.distance_m,
            level,
            summary.retained,
            summary.total,
            summary.no_object_frames
        );

        let sent = self.transmitter.dispatch(level, &mut self.link);
        self.stats.windows += 1;
        match sent {
            Some(_) => self.stats.alerts_sent += 1,
            None => {
                self.stats.alerts_dropped += 1;
                self.supervisor.mark_lost();
            }
        }
        self.stats.last_distance_m = Some(summary.distance_m);
        self.stats.last_level = Some(level);

        if let Some(telemetry) = self.telemetry.as_mut() {
            if let Err(e) = telemetry.record(Instant::now(), Some(frame), summary.distance_m, level.as_byte()) {
                log::warn!("telemetry append failed: {:#}", e);
            }
        }

        WindowOutcome {
            summary,
            level,
            sent,
        }
    }

    /// Health-check the link if the configured interval has elapsed.
    pub fn poll_link(&mut self, now: Instant) {
        self.supervisor.poll_health(&mut self.link, now);
    }

    /// Connect unless [`connect`](Self::connect) already ran, then process
    /// frames until `shutdown` is raised or the frame limit is reached.
    /// Stops `source` before returning.
    pub fn run(
        &mut self,
        source: &mut FrameSource,
        detector: &mut dyn DetectorBackend,
        shutdown: &AtomicBool,
    ) -> Result<PipelineStats> {
        log::info!(
            "pipeline starting: detector={} link={} window={} filter={}",
            detector.name(),
            self.supervisor.backend_name(),
            self.window.size(),
            self.window.filter().as_str()
        );
        if !self.startup_attempted {
            self.connect(shutdown);
        }
        if self.link.is_none() && !shutdown.load(Ordering::SeqCst) {
            log::warn!("starting without a controller session; health checks will retry");
        }

        while !shutdown.load(Ordering::SeqCst) {
            if self
                .frame_limit
                .is_some_and(|limit| self.stats.frames_processed >= limit)
            {
                break;
            }
            match source.latest() {
                Some(frame) => {
                    self.process_frame(&frame, detector);
                }
                None => std::thread::sleep(NO_FRAME_PAUSE),
            }
            self.poll_link(Instant::now());
        }

        source.stop()?;
        self.stats.capture = source.stats();
        log::info!(
            "pipeline stopped: {} frames, {} windows, {} alerts sent, {} dropped",
            self.stats.frames_processed,
            self.stats.windows,
            self.stats.alerts_sent,
            self.stats.alerts_dropped
        );
        Ok(self.stats.clone())
    }
}
