//! Integration tests for configuration loading

use actibump::infra::{CommandProtocol, Config, PolicyMode, SpeedUnit};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let config_content = r#"
[site]
id = "main-street-north"

[video]
frame_width = 1920
frame_height = 1080

[tracking]
quality_floor = 6.5
detect_every_n_frames = 3
exit_grace_frames = 2

[speed]
unit = "px_per_sec"
pixels_per_meter = 42.0
smoothing_alpha = 0.5
limit = 300.0

[policy]
mode = "count"
geofence_y = 640.0

[actuator]
enabled = false
device = "/dev/ttyACM0"
baud = 9600
protocol = "letter"
resend_interval_ms = 1000

[remote]
table = "bumps"
timeout_ms = 1500

[ocr]
enabled = false
interval_ms = 250
min_confidence = 0.6
emergency_marker = "AMB"

[metrics]
interval_secs = 15
prometheus_port = 9091

[event_log]
file = "/var/log/actibump/events.jsonl"
"#;
    let temp_file = write_config(config_content);

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "main-street-north");
    assert_eq!(config.frame_width(), 1920);
    assert_eq!(config.quality_floor(), 6.5);
    assert_eq!(config.detect_every_n_frames(), 3);
    assert_eq!(config.exit_grace_frames(), 2);
    assert_eq!(config.speed_unit(), SpeedUnit::PxPerSec);
    assert_eq!(config.pixels_per_meter(), 42.0);
    assert_eq!(config.smoothing_alpha(), 0.5);
    assert_eq!(config.policy_mode(), PolicyMode::Count);
    assert_eq!(config.geofence_y(), 640.0);
    assert!(!config.actuator_enabled());
    assert_eq!(config.command_protocol(), CommandProtocol::Letter);
    assert_eq!(config.resend_interval_ms(), 1000);
    assert_eq!(config.remote_table(), "bumps");
    assert!(!config.ocr_enabled());
    assert_eq!(config.emergency_marker(), "AMB");
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.event_log_file(), "/var/log/actibump/events.jsonl");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp_file = write_config("[policy]\nmode = \"count\"\n");
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.policy_mode(), PolicyMode::Count);
    assert_eq!(config.speed_limit(), 35.0);
    assert_eq!(config.detect_every_n_frames(), 5);
    assert_eq!(config.command_protocol(), CommandProtocol::SpeedLine);
}

#[test]
fn test_invalid_calibration_is_rejected() {
    let temp_file = write_config("[speed]\npixels_per_meter = 0.0\n");
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config("[tracking]\ndetect_every_n_frames = 0\n");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_zero_queue_or_interval_falls_back_to_defaults() {
    let temp_file = write_config("[ocr]\nqueue_capacity = 0\n");
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config("[metrics]\ninterval_secs = 0\n[policy]\nmode = \"count\"\n");
    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.metrics_interval_secs(), 10);
    assert_eq!(config.ocr_queue_capacity(), 64);
    assert_eq!(config.policy_mode(), PolicyMode::Damage);
}

#[test]
fn test_alpha_is_clamped_not_rejected() {
    let temp_file = write_config("[speed]\nsmoothing_alpha = 1.5\n");
    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.smoothing_alpha() < 1.0);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.site_id(), "actibump");
    assert_eq!(config.policy_mode(), PolicyMode::Damage);
    assert_eq!(config.speed_unit(), SpeedUnit::Kmh);
}
