use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use proximity_warner::config::ProximityConfig;
use proximity_warner::{OutlierFilter, PipelineError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROXIMITY_CONFIG",
        "PROXIMITY_FOCAL_LENGTH",
        "PROXIMITY_CALIBRATION_PATH",
        "PROXIMITY_CAMERA",
        "PROXIMITY_LINK_BACKEND",
        "PROXIMITY_PEER_ADDRESS",
        "PROXIMITY_WINDOW_SIZE",
        "PROXIMITY_OUTLIER_FILTER",
        "PROXIMITY_TELEMETRY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_file(file: &mut NamedTempFile, contents: &str) {
    std::io::Write::write_all(file, contents.as_bytes()).expect("write file");
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    write_file(
        &mut file,
        r#"{
            "estimation": {
                "focal_length": 812.5,
                "confidence_threshold": 0.6,
                "window_size": 12,
                "outlier_filter": "symmetric_band"
            },
            "alert": { "red_below_m": 20.0, "yellow_below_m": 45.0 },
            "camera": { "device": "/dev/video2", "width": 1280, "height": 720, "target_fps": 15 },
            "link": {
                "peer_address": "aa:bb:cc:dd:ee:ff",
                "scan_ms": 1500,
                "health_interval_ms": 2500,
                "connect_attempts": 4
            }
        }"#,
    );

    std::env::set_var("PROXIMITY_CONFIG", file.path());
    std::env::set_var("PROXIMITY_WINDOW_SIZE", "8");
    std::env::set_var("PROXIMITY_CAMERA", "stub://bench");

    let cfg = ProximityConfig::load().expect("load config");

    assert_eq!(cfg.estimation.focal_length.value(), 812.5);
    assert_eq!(cfg.estimation.confidence_threshold, 0.6);
    assert_eq!(cfg.estimation.window_size, 8);
    assert_eq!(cfg.estimation.outlier_filter, OutlierFilter::SymmetricBand);
    assert_eq!(cfg.alert.red_below_m, 20.0);
    assert_eq!(cfg.alert.yellow_below_m, 45.0);
    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.link.peer_address, "AA:BB:CC:DD:EE:FF");
    assert_eq!(cfg.link.scan_duration, Duration::from_millis(1500));
    assert_eq!(cfg.link.health_interval, Duration::from_millis(2500));
    assert_eq!(cfg.link.connect_attempts, Some(4));
    assert!(cfg.telemetry.is_none());

    clear_env();
}

#[test]
fn defaults_apply_around_a_focal_length() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PROXIMITY_FOCAL_LENGTH", "800");

    let cfg = ProximityConfig::load().expect("load config");

    assert_eq!(cfg.estimation.window_size, 10);
    assert_eq!(cfg.estimation.confidence_threshold, 0.5);
    assert_eq!(cfg.estimation.outlier_filter, OutlierFilter::LiteralOr);
    assert_eq!(cfg.alert.red_below_m, 25.0);
    assert_eq!(cfg.alert.yellow_below_m, 50.0);
    assert_eq!(cfg.link.health_interval, Duration::from_millis(5000));
    assert_eq!(cfg.link.scan_duration, Duration::from_millis(2000));
    assert_eq!(cfg.link.connect_attempts, None);
    assert_eq!(
        cfg.estimation.size_table.width_of("full_front_view_car").unwrap(),
        1.81
    );

    clear_env();
}

#[test]
fn reads_focal_length_from_calibration_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut calibration = NamedTempFile::new().expect("temp calibration");
    write_file(
        &mut calibration,
        r#"{"calibration image": {"focal length": 731.25, "image": "calib.jpg"}}"#,
    );
    std::env::set_var("PROXIMITY_CALIBRATION_PATH", calibration.path());

    let cfg = ProximityConfig::load().expect("load config");
    assert_eq!(cfg.estimation.focal_length.value(), 731.25);

    clear_env();
}

#[test]
fn loads_toml_with_custom_size_table() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    write_file(
        &mut file,
        r#"
[estimation]
focal_length = 640.0

[estimation.size_table]
hatchback = 1.7
lorry = 2.5

[telemetry]
log_path = "alerts.json"
interval_ms = 1000
"#,
    );

    let cfg = ProximityConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.estimation.size_table.width_of("lorry").unwrap(), 2.5);
    assert!(!cfg.estimation.size_table.contains("full_front_view_car"));
    let telemetry = cfg.telemetry.unwrap();
    assert_eq!(telemetry.log_path, std::path::PathBuf::from("alerts.json"));
    assert_eq!(telemetry.interval, Duration::from_millis(1_000));

    clear_env();
}

#[test]
fn missing_focal_length_is_a_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = ProximityConfig::load().unwrap_err();
    let classified = err.downcast_ref::<PipelineError>().expect("classified error");
    assert_eq!(classified.code(), "CONFIG_INVALID");

    clear_env();
}

#[test]
fn rejects_unknown_outlier_filter_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PROXIMITY_FOCAL_LENGTH", "800");
    std::env::set_var("PROXIMITY_OUTLIER_FILTER", "median");

    assert!(ProximityConfig::load().is_err());

    clear_env();
}

#[test]
fn telemetry_path_from_env_uses_default_interval() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROXIMITY_FOCAL_LENGTH", "640");
    std::env::set_var("PROXIMITY_TELEMETRY_PATH", "/tmp/alerts.json");

    let cfg = ProximityConfig::load().expect("load config");
    let telemetry = cfg.telemetry.expect("telemetry enabled");
    assert_eq!(telemetry.log_path, std::path::PathBuf::from("/tmp/alerts.json"));
    assert_eq!(telemetry.interval, Duration::from_millis(5_000));
    assert!(telemetry.snapshot_dir.is_none());

    clear_env();
}
