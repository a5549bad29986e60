//! proximityd - rear-vehicle proximity warning daemon
//!
//! This daemon:
//! 1. Loads the configuration (file, then PROXIMITY_* overrides)
//! 2. Opens the camera and starts frame acquisition
//! 3. Loads the detector
//! 4. Connects to the LED controller, blocking until it answers
//! 5. Summarizes distance windows and sends alerts until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proximity_warner::{
    build_detector, build_link_backend, Camera, FrameSource, OutlierFilter, Pipeline,
    ProximityConfig, TelemetryLog,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "PROXIMITY_CONFIG")]
    config: Option<PathBuf>,
    /// Outlier filter override (literal_or|symmetric_band).
    #[arg(long, value_name = "FILTER")]
    outlier_filter: Option<OutlierFilter>,
    /// Stop after processing this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_flag(&args.ui, std::io::stderr().is_terminal());

    let mut config = {
        let _stage = ui.stage("Load configuration");
        ProximityConfig::load_from(args.config.as_deref())?
    };
    if let Some(filter) = args.outlier_filter {
        config.estimation.outlier_filter = filter;
    }
    log::info!(
        "focal length {:.1} px, window {} frames, filter {}, red < {} m, yellow < {} m",
        config.estimation.focal_length.value(),
        config.estimation.window_size,
        config.estimation.outlier_filter.as_str(),
        config.alert.red_below_m,
        config.alert.yellow_below_m
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let mut source = {
        let _stage = ui.stage("Open camera");
        FrameSource::start(Camera::new(&config.camera)?)?
    };

    let mut detector = {
        let _stage = ui.stage("Load detector");
        let mut detector = build_detector(&config)?;
        detector.warm_up()?;
        detector
    };

    let mut pipeline = Pipeline::new(&config, build_link_backend(&config.link)?);
    if let Some(settings) = &config.telemetry {
        log::info!("telemetry log: {}", settings.log_path.display());
        pipeline = pipeline.with_telemetry(TelemetryLog::new(settings));
    }
    if let Some(frames) = args.max_frames {
        pipeline = pipeline.with_frame_limit(frames);
    }

    {
        let mut stage = ui.waiting_stage(&format!("Connect to {}", config.link.peer_address));
        if !pipeline.connect(&shutdown) {
            stage.fail();
        }
    }

    let stats = pipeline.run(&mut source, detector.as_mut(), &shutdown)?;
    log::info!(
        "captured {} frames ({} capture failures) from {}",
        stats.capture.frames_captured,
        stats.capture.capture_failures,
        stats.capture.device
    );
    if stats.frames_rejected > 0 {
        log::error!(
            "{} frame(s) carried labels missing from the size table",
            stats.frames_rejected
        );
    }
    if let (Some(distance), Some(level)) = (stats.last_distance_m, stats.last_level) {
        log::info!("last window: {:.2} m ({})", distance, level);
    }
    Ok(())
}
