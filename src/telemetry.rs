//! Optional record of transmitted alerts.
//!
//! The log is a single JSON array, rewritten on each append:
//!
//! ```json
//! [{"image": "frame_000120.jpg", "summarized_distance": 14.48, "alert_byte": 1, "timestamp_s": 1718000000}]
//! ```
//!
//! `image` is null unless a snapshot directory is configured and the crate is
//! built with `snapshot-jpeg`. Nothing in the pipeline reads this file back.
//!
//! Each append reads and rewrites the whole array, so its cost grows with the
//! file. The pipeline records at most one window per
//! [`TelemetrySettings::interval`] (5 s by default, the link health cadence)
//! instead of every window. The file is never rotated or truncated; delete
//! or move it between runs to bound its size.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::TelemetrySettings;
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub image: Option<String>,
    pub summarized_distance: f64,
    pub alert_byte: u8,
    pub timestamp_s: u64,
}

pub struct TelemetryLog {
    path: PathBuf,
    snapshot_dir: Option<PathBuf>,
    interval: Duration,
    last_record: Option<Instant>,
    appended: u64,
}

impl TelemetryLog {
    pub fn new(settings: &TelemetrySettings) -> Self {
        if settings.snapshot_dir.is_some() && !cfg!(feature = "snapshot-jpeg") {
            log::warn!("telemetry snapshots need the snapshot-jpeg feature; recording without images");
        }
        Self {
            path: settings.log_path.clone(),
            snapshot_dir: settings.snapshot_dir.clone(),
            interval: settings.interval,
            last_record: None,
            appended: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended by this process.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// [`append`](Self::append) if at least the configured interval has
    /// passed since the last record taken through this call. Returns whether
    /// a record was written.
    pub fn record(
        &mut self,
        now: Instant,
        frame: Option<&Frame>,
        summarized_distance: f64,
        alert_byte: u8,
    ) -> Result<bool> {
        if self
            .last_record
            .is_some_and(|last| now.saturating_duration_since(last) < self.interval)
        {
            return Ok(false);
        }
        self.last_record = Some(now);
        self.append(frame, summarized_distance, alert_byte)?;
        Ok(true)
    }

    /// Append one record, saving `frame` as a snapshot when configured.
    pub fn append(&mut self, frame: Option<&Frame>, summarized_distance: f64, alert_byte: u8) -> Result<()> {
        let image = match (&self.snapshot_dir, frame) {
            (Some(dir), Some(frame)) => save_snapshot(dir, frame)?,
            _ => None,
        };
        let timestamp_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut records = self.read_all()?;
        records.push(TelemetryRecord {
            image,
            summarized_distance,
            alert_byte,
            timestamp_s,
        });
        let json = serde_json::to_vec_pretty(&records)?;
        write_atomic(&self.path, &json)
            .with_context(|| format!("failed to write telemetry log {}", self.path.display()))?;
        self.appended += 1;
        Ok(())
    }

    /// All records currently in the log. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<TelemetryRecord>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow!(
                    "failed to read telemetry log {}: {}",
                    self.path.display(),
                    e
                ))
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw)
            .with_context(|| format!("telemetry log {} is not a JSON array", self.path.display()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(feature = "snapshot-jpeg")]
fn save_snapshot(dir: &Path, frame: &Frame) -> Result<Option<String>> {
    let name = format!("frame_{:06}.jpg", frame.sequence);
    let rgb = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame {} is not a {}x{} RGB buffer", frame.sequence, frame.width, frame.height))?;
    fs::create_dir_all(dir)?;
    rgb.save_with_format(dir.join(&name), image::ImageFormat::Jpeg)
        .with_context(|| format!("failed to save snapshot {}", name))?;
    Ok(Some(name))
}

#[cfg(not(feature = "snapshot-jpeg"))]
fn save_snapshot(_dir: &Path, _frame: &Frame) -> Result<Option<String>> {
    Ok(None)
}
