use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::CaptureDevice;
use crate::error::PipelineError;
use crate::frame::{Frame, FrameSlot};

/// Pause after a failed capture before the next attempt.
const CAPTURE_RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Capture counters for health logging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub device: String,
}

#[derive(Default)]
struct CaptureCounters {
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
}

/// Continuously captures frames on a dedicated thread and publishes the latest.
///
/// There is exactly one acquisition loop per source. It is started by
/// [`FrameSource::start`] and ends when [`FrameSource::stop`] is called or the
/// source is dropped.
pub struct FrameSource {
    slot: FrameSlot,
    shutdown: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    device: String,
    join: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Open `device` and start the acquisition loop.
    ///
    /// A device that cannot be opened is a fatal error for the caller.
    pub fn start<D: CaptureDevice>(mut device: D) -> Result<Self> {
        device
            .open()
            .map_err(|err| anyhow!("failed to open camera {}: {:#}", device.describe(), err))?;

        let slot = FrameSlot::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(CaptureCounters::default());
        let description = device.describe();

        let thread_slot = slot.clone();
        let thread_shutdown = shutdown.clone();
        let thread_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || {
                acquisition_loop(device, thread_slot, thread_shutdown, thread_counters);
            })?;

        log::info!("FrameSource: acquisition started on {}", description);
        Ok(Self {
            slot,
            shutdown,
            counters,
            device: description,
            join: Some(join),
        })
    }

    /// Copy of the most recent frame. Never waits for a new capture.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.snapshot()
    }

    /// Sequence of the most recent frame, without copying it.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.slot.latest_sequence()
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    /// Signal the loop to finish its current iteration, then wait for it to
    /// release the device. `latest()` keeps returning the last frame.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame acquisition thread panicked"))?;
            log::info!("FrameSource: acquisition stopped on {}", self.device);
        }
        Ok(())
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.counters.capture_failures.load(Ordering::Relaxed),
            device: self.device.clone(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("FrameSource: {}", err);
        }
    }
}

fn acquisition_loop<D: CaptureDevice>(
    mut device: D,
    slot: FrameSlot,
    shutdown: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match device.capture() {
            Ok(frame) => {
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                slot.publish(frame);
            }
            Err(err) => {
                counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                let err = PipelineError::Capture {
                    message: format!("{}: {:#}", device.describe(), err),
                };
                log::warn!("FrameSource: {}", err);
                std::thread::sleep(CAPTURE_RETRY_PAUSE);
            }
        }
    }
    device.release();
}
