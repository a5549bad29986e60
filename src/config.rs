use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::estimate::OutlierFilter;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_WINDOW_SIZE: usize = 10;
const DEFAULT_RED_BELOW_M: f64 = 25.0;
const DEFAULT_YELLOW_BELOW_M: f64 = 50.0;
const DEFAULT_CAMERA_DEVICE: &str = "stub://rear_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_DETECTOR_BACKEND: &str = "scripted";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 320;
const DEFAULT_LINK_BACKEND: &str = "stub://led_controller";
const DEFAULT_PEER_ADDRESS: &str = "45:99:72:43:F3:24";
const DEFAULT_SERVICE_UUID: &str = "12345678-1234-5678-1234-56789abcdef0";
const DEFAULT_CHARACTERISTIC_UUID: &str = "12345678-1234-5678-1234-56789abcdef1";
const DEFAULT_SCAN_MS: u64 = 2_000;
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = DEFAULT_HEALTH_INTERVAL_MS;

/// Known real-world widths (meters) for the classes the vehicle model emits.
pub const DEFAULT_SIZE_TABLE: [(&str, f64); 4] = [
    ("full_front_view_car", 1.81),
    ("covered_front_view_car", 0.905),
    ("side_view_car", 4.36),
    ("covered_side_view_car", 2.18),
];

// -------------------- File representation --------------------

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    estimation: Option<EstimationConfigFile>,
    alert: Option<AlertConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    link: Option<LinkConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct EstimationConfigFile {
    focal_length: Option<f64>,
    calibration_path: Option<PathBuf>,
    size_table: Option<BTreeMap<String, f64>>,
    confidence_threshold: Option<f32>,
    window_size: Option<usize>,
    outlier_filter: Option<OutlierFilter>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    red_below_m: Option<f64>,
    yellow_below_m: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LinkConfigFile {
    backend: Option<String>,
    peer_address: Option<String>,
    service_uuid: Option<String>,
    characteristic_uuid: Option<String>,
    scan_ms: Option<u64>,
    health_interval_ms: Option<u64>,
    connect_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    log_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    #[serde(rename = "calibration image")]
    calibration_image: Option<CalibrationImage>,
}

#[derive(Debug, Deserialize)]
struct CalibrationImage {
    #[serde(rename = "focal length")]
    focal_length: Option<f64>,
}

// -------------------- Resolved configuration --------------------

/// Empirical focal length (pixels) relating known width, distance and box width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FocalLength(f64);

impl FocalLength {
    pub fn new(value: f64) -> Result<Self, PipelineError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "focal length must be a positive number, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Read the persisted calibration result.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read calibration file {}: {}", path.display(), e))?;
        let parsed: CalibrationFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid calibration file {}: {}", path.display(), e))?;
        let value = parsed
            .calibration_image
            .and_then(|image| image.focal_length)
            .ok_or_else(|| {
                anyhow!(
                    "calibration file {} has no \"calibration image\".\"focal length\"",
                    path.display()
                )
            })?;
        Ok(Self::new(value)?)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Class label to real-world object width (meters).
#[derive(Clone, Debug, PartialEq)]
pub struct SizeTable {
    widths: BTreeMap<String, f64>,
}

impl SizeTable {
    pub fn new<I, S>(entries: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut widths = BTreeMap::new();
        for (label, width) in entries {
            let label = label.into();
            if label.trim().is_empty() {
                return Err(PipelineError::invalid_config("size table label is empty"));
            }
            if !width.is_finite() || width <= 0.0 {
                return Err(PipelineError::invalid_config(format!(
                    "size table width for '{}' must be positive, got {}",
                    label, width
                )));
            }
            widths.insert(label, width);
        }
        if widths.is_empty() {
            return Err(PipelineError::invalid_config("size table is empty"));
        }
        Ok(Self { widths })
    }

    pub fn width_of(&self, label: &str) -> Result<f64, PipelineError> {
        self.widths
            .get(label)
            .copied()
            .ok_or_else(|| PipelineError::UnmappedLabel {
                label: label.to_string(),
            })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.widths.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.widths.keys().map(|label| label.as_str())
    }
}

impl Default for SizeTable {
    fn default() -> Self {
        Self {
            widths: DEFAULT_SIZE_TABLE
                .iter()
                .map(|(label, width)| (label.to_string(), *width))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EstimationSettings {
    pub focal_length: FocalLength,
    pub size_table: SizeTable,
    /// Detections must score strictly above this to count.
    pub confidence_threshold: f32,
    /// Frames per summarized window.
    pub window_size: usize,
    pub outlier_filter: OutlierFilter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub red_below_m: f64,
    pub yellow_below_m: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            red_below_m: DEFAULT_RED_BELOW_M,
            yellow_below_m: DEFAULT_YELLOW_BELOW_M,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    /// Model input resolution; frames are resized to it before inference.
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub backend: String,
    pub peer_address: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub scan_duration: Duration,
    pub health_interval: Duration,
    /// Startup connect attempts; `None` retries until a peer answers.
    pub connect_attempts: Option<u32>,
    pub retry_delay: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_LINK_BACKEND.to_string(),
            peer_address: DEFAULT_PEER_ADDRESS.to_string(),
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_string(),
            scan_duration: Duration::from_millis(DEFAULT_SCAN_MS),
            health_interval: Duration::from_millis(DEFAULT_HEALTH_INTERVAL_MS),
            connect_attempts: None,
            retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_path: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    /// Minimum spacing between records. Windows closing sooner are not
    /// logged. Zero records every window.
    pub interval: Duration,
}

impl TelemetrySettings {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            snapshot_dir: None,
            interval: Duration::from_millis(DEFAULT_TELEMETRY_INTERVAL_MS),
        }
    }
}

/// Process-wide configuration. Built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct ProximityConfig {
    pub estimation: EstimationSettings,
    pub alert: AlertThresholds,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub link: LinkSettings,
    pub telemetry: Option<TelemetrySettings>,
}

impl ProximityConfig {
    /// Default deployment around an already known focal length.
    pub fn with_focal_length(focal_length: FocalLength) -> Self {
        Self {
            estimation: EstimationSettings {
                focal_length,
                size_table: SizeTable::default(),
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                window_size: DEFAULT_WINDOW_SIZE,
                outlier_filter: OutlierFilter::default(),
            },
            alert: AlertThresholds::default(),
            camera: CameraSettings {
                device: DEFAULT_CAMERA_DEVICE.to_string(),
                width: DEFAULT_CAMERA_WIDTH,
                height: DEFAULT_CAMERA_HEIGHT,
                target_fps: DEFAULT_CAMERA_FPS,
            },
            detector: DetectorSettings {
                backend: DEFAULT_DETECTOR_BACKEND.to_string(),
                model_path: None,
                labels_path: None,
                input_width: DEFAULT_MODEL_INPUT_SIZE,
                input_height: DEFAULT_MODEL_INPUT_SIZE,
            },
            link: LinkSettings::default(),
            telemetry: None,
        }
    }

    /// Load from the file named by `PROXIMITY_CONFIG` (if set), then apply
    /// `PROXIMITY_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("PROXIMITY_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`load`](Self::load) with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProximityConfigFile) -> Result<Self> {
        let estimation_file = file.estimation.unwrap_or_default();
        let focal_length = resolve_focal_length(&estimation_file)?;
        let mut cfg = Self::with_focal_length(focal_length);

        if let Some(table) = estimation_file.size_table {
            cfg.estimation.size_table = SizeTable::new(table)?;
        }
        if let Some(threshold) = estimation_file.confidence_threshold {
            cfg.estimation.confidence_threshold = threshold;
        }
        if let Some(window_size) = estimation_file.window_size {
            cfg.estimation.window_size = window_size;
        }
        if let Some(filter) = estimation_file.outlier_filter {
            cfg.estimation.outlier_filter = filter;
        }

        if let Some(alert) = file.alert {
            cfg.alert = AlertThresholds {
                red_below_m: alert.red_below_m.unwrap_or(DEFAULT_RED_BELOW_M),
                yellow_below_m: alert.yellow_below_m.unwrap_or(DEFAULT_YELLOW_BELOW_M),
            };
        }

        if let Some(camera) = file.camera {
            cfg.camera = CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            };
        }

        if let Some(detector) = file.detector {
            cfg.detector = DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                input_width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
                input_height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            };
        }

        if let Some(link) = file.link {
            let defaults = LinkSettings::default();
            cfg.link = LinkSettings {
                backend: link.backend.unwrap_or(defaults.backend),
                peer_address: link.peer_address.unwrap_or(defaults.peer_address),
                service_uuid: link.service_uuid.unwrap_or(defaults.service_uuid),
                characteristic_uuid: link
                    .characteristic_uuid
                    .unwrap_or(defaults.characteristic_uuid),
                scan_duration: link
                    .scan_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.scan_duration),
                health_interval: link
                    .health_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.health_interval),
                connect_attempts: link.connect_attempts,
                retry_delay: link
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry_delay),
            };
        }

        cfg.telemetry = file.telemetry.and_then(|telemetry| {
            telemetry.log_path.map(|log_path| TelemetrySettings {
                log_path,
                snapshot_dir: telemetry.snapshot_dir,
                interval: telemetry
                    .interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::from_millis(DEFAULT_TELEMETRY_INTERVAL_MS)),
            })
        });

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("PROXIMITY_CAMERA") {
            self.camera.device = device;
        }
        if let Some(backend) = non_empty_env("PROXIMITY_LINK_BACKEND") {
            self.link.backend = backend;
        }
        if let Some(address) = non_empty_env("PROXIMITY_PEER_ADDRESS") {
            self.link.peer_address = address;
        }
        if let Some(window) = non_empty_env("PROXIMITY_WINDOW_SIZE") {
            self.estimation.window_size = window
                .parse()
                .map_err(|_| anyhow!("PROXIMITY_WINDOW_SIZE must be a positive integer"))?;
        }
        if let Some(filter) = non_empty_env("PROXIMITY_OUTLIER_FILTER") {
            self.estimation.outlier_filter = filter.parse()?;
        }
        if let Some(path) = non_empty_env("PROXIMITY_TELEMETRY_PATH") {
            self.telemetry = Some(match self.telemetry.take() {
                Some(existing) => TelemetrySettings {
                    log_path: PathBuf::from(path),
                    ..existing
                },
                None => TelemetrySettings::new(path),
            });
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let estimation = &self.estimation;
        if estimation.window_size == 0 {
            return Err(PipelineError::invalid_config("window size must be at least 1").into());
        }
        let threshold = estimation.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(PipelineError::invalid_config(format!(
                "confidence threshold must be in (0, 1], got {}",
                threshold
            ))
            .into());
        }
        let alert = self.alert;
        if !(alert.red_below_m.is_finite() && alert.yellow_below_m.is_finite())
            || alert.red_below_m <= 0.0
            || alert.red_below_m >= alert.yellow_below_m
        {
            return Err(PipelineError::invalid_config(format!(
                "alert thresholds must satisfy 0 < red ({}) < yellow ({})",
                alert.red_below_m, alert.yellow_below_m
            ))
            .into());
        }
        self.link.peer_address = self.link.peer_address.trim().to_uppercase();
        if self.link.peer_address.is_empty() {
            return Err(PipelineError::invalid_config("peer address must be set").into());
        }
        Ok(())
    }
}

fn resolve_focal_length(file: &EstimationConfigFile) -> Result<FocalLength> {
    if let Some(value) = non_empty_env("PROXIMITY_FOCAL_LENGTH") {
        let value: f64 = value
            .parse()
            .map_err(|_| anyhow!("PROXIMITY_FOCAL_LENGTH must be a number"))?;
        return Ok(FocalLength::new(value)?);
    }
    if let Some(path) = non_empty_env("PROXIMITY_CALIBRATION_PATH") {
        return FocalLength::load(Path::new(&path));
    }
    if let Some(value) = file.focal_length {
        return Ok(FocalLength::new(value)?);
    }
    if let Some(path) = &file.calibration_path {
        return FocalLength::load(path);
    }
    Err(PipelineError::invalid_config(
        "no focal length: set estimation.focal_length, estimation.calibration_path \
         or PROXIMITY_CALIBRATION_PATH",
    )
    .into())
}

fn read_config_file(path: &Path) -> Result<ProximityConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
