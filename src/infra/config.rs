//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Remote store credentials may also come from SUPABASE_URL, SUPABASE_KEY
//! and SPEED_BUMP_ID, which override the file.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Units the speed estimator reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    /// Kilometres per hour via the pixels-per-meter scalar
    Kmh,
    /// Raw pixels per second
    PxPerSec,
}

impl SpeedUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedUnit::Kmh => "km/h",
            SpeedUnit::PxPerSec => "px/s",
        }
    }
}

/// Which one-shot event a speeding vehicle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Wear damage once the vehicle reaches the geofence line
    Damage,
    /// Cumulative speeding count on first speeding classification
    Count,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Damage => "damage",
            PolicyMode::Count => "count",
        }
    }
}

/// Actuator wire protocol, fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandProtocol {
    /// `S:<speed>\n` lines parsed by the bump controller firmware
    SpeedLine,
    /// Single bytes: `R` raise, `L` lower
    Letter,
}

impl CommandProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandProtocol::SpeedLine => "speed_line",
            CommandProtocol::Letter => "letter",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "main-street-north")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "actibump".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { frame_width: default_frame_width(), frame_height: default_frame_height() }
    }
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Tracker quality below this value counts as lost
    #[serde(default = "default_quality_floor")]
    pub quality_floor: f64,
    /// Run the detector on every Nth frame
    #[serde(default = "default_detect_every")]
    pub detect_every_n_frames: u64,
    /// Consecutive low-quality frames tolerated before removal (0 = immediate)
    #[serde(default)]
    pub exit_grace_frames: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            quality_floor: default_quality_floor(),
            detect_every_n_frames: default_detect_every(),
            exit_grace_frames: 0,
        }
    }
}

fn default_quality_floor() -> f64 {
    7.0
}

fn default_detect_every() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeedConfig {
    #[serde(default = "default_unit")]
    pub unit: SpeedUnit,
    #[serde(default = "default_pixels_per_meter")]
    pub pixels_per_meter: f64,
    /// Weight of the previous smoothed value
    #[serde(default = "default_alpha")]
    pub smoothing_alpha: f64,
    /// Samples closer together than this are skipped
    #[serde(default = "default_min_dt")]
    pub min_dt_secs: f64,
    #[serde(default = "default_limit")]
    pub limit: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            unit: default_unit(),
            pixels_per_meter: default_pixels_per_meter(),
            smoothing_alpha: default_alpha(),
            min_dt_secs: default_min_dt(),
            limit: default_limit(),
        }
    }
}

fn default_unit() -> SpeedUnit {
    SpeedUnit::Kmh
}

fn default_pixels_per_meter() -> f64 {
    35.0
}

fn default_alpha() -> f64 {
    0.7
}

const MAX_ALPHA: f64 = 0.99;

fn default_min_dt() -> f64 {
    0.01
}

fn default_limit() -> f64 {
    35.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_mode")]
    pub mode: PolicyMode,
    /// Y coordinate a vehicle center must reach before damage accrues
    #[serde(default = "default_geofence_y")]
    pub geofence_y: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { mode: default_policy_mode(), geofence_y: default_geofence_y() }
    }
}

fn default_policy_mode() -> PolicyMode {
    PolicyMode::Damage
}

fn default_geofence_y() -> f64 {
    400.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_actuator_device")]
    pub device: String,
    #[serde(default = "default_actuator_baud")]
    pub baud: u32,
    #[serde(default = "default_protocol")]
    pub protocol: CommandProtocol,
    /// Unchanged commands are re-sent after this interval
    #[serde(default = "default_resend_ms")]
    pub resend_interval_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: default_actuator_device(),
            baud: default_actuator_baud(),
            protocol: default_protocol(),
            resend_interval_ms: default_resend_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_actuator_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_actuator_baud() -> u32 {
    115200
}

fn default_protocol() -> CommandProtocol {
    CommandProtocol::SpeedLine
}

fn default_resend_ms() -> u64 {
    750
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteConfig {
    /// Base URL of the record store, e.g. https://xyz.supabase.co
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Record identifier (UUID)
    #[serde(default)]
    pub bump_id: Option<String>,
    #[serde(default = "default_remote_table")]
    pub table: String,
    #[serde(default = "default_remote_timeout")]
    pub timeout_ms: u64,
}

fn default_remote_table() -> String {
    "speed_bumps".to_string()
}

fn default_remote_timeout() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum stream time between two OCR jobs for one track
    #[serde(default = "default_ocr_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_ocr_queue")]
    pub queue_capacity: usize,
    #[serde(default = "default_ocr_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_emergency_marker")]
    pub emergency_marker: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_ocr_interval(),
            queue_capacity: default_ocr_queue(),
            min_confidence: default_ocr_confidence(),
            emergency_marker: default_emergency_marker(),
        }
    }
}

fn default_ocr_interval() -> u64 {
    500
}

fn default_ocr_queue() -> usize {
    64
}

fn default_ocr_confidence() -> f64 {
    0.4
}

fn default_emergency_marker() -> String {
    "MAI".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// JSONL audit file for fired policy events (empty to disable)
    #[serde(default = "default_event_log_file")]
    pub file: String,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { file: default_event_log_file() }
    }
}

fn default_event_log_file() -> String {
    "events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub speed: SpeedConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    frame_width: u32,
    frame_height: u32,
    quality_floor: f64,
    detect_every_n_frames: u64,
    exit_grace_frames: u32,
    speed_unit: SpeedUnit,
    pixels_per_meter: f64,
    smoothing_alpha: f64,
    min_dt_secs: f64,
    speed_limit: f64,
    policy_mode: PolicyMode,
    geofence_y: f64,
    actuator_enabled: bool,
    actuator_device: String,
    actuator_baud: u32,
    command_protocol: CommandProtocol,
    resend_interval_ms: u64,
    remote_url: Option<String>,
    remote_key: Option<String>,
    remote_bump_id: Option<String>,
    remote_table: String,
    remote_timeout_ms: u64,
    ocr_enabled: bool,
    ocr_interval_ms: u64,
    ocr_queue_capacity: usize,
    ocr_min_confidence: f64,
    emergency_marker: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    event_log_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            frame_width: toml_config.video.frame_width,
            frame_height: toml_config.video.frame_height,
            quality_floor: toml_config.tracking.quality_floor,
            detect_every_n_frames: toml_config.tracking.detect_every_n_frames,
            exit_grace_frames: toml_config.tracking.exit_grace_frames,
            speed_unit: toml_config.speed.unit,
            pixels_per_meter: toml_config.speed.pixels_per_meter,
            smoothing_alpha: toml_config.speed.smoothing_alpha,
            min_dt_secs: toml_config.speed.min_dt_secs,
            speed_limit: toml_config.speed.limit,
            policy_mode: toml_config.policy.mode,
            geofence_y: toml_config.policy.geofence_y,
            actuator_enabled: toml_config.actuator.enabled,
            actuator_device: toml_config.actuator.device,
            actuator_baud: toml_config.actuator.baud,
            command_protocol: toml_config.actuator.protocol,
            resend_interval_ms: toml_config.actuator.resend_interval_ms,
            remote_url: toml_config.remote.url,
            remote_key: toml_config.remote.key,
            remote_bump_id: toml_config.remote.bump_id,
            remote_table: toml_config.remote.table,
            remote_timeout_ms: toml_config.remote.timeout_ms,
            ocr_enabled: toml_config.ocr.enabled,
            ocr_interval_ms: toml_config.ocr.interval_ms,
            ocr_queue_capacity: toml_config.ocr.queue_capacity,
            ocr_min_confidence: toml_config.ocr.min_confidence,
            emergency_marker: toml_config.ocr.emergency_marker,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            event_log_file: toml_config.event_log.file,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self::from_toml(toml_config, path.display().to_string());
        config.clamp_alpha();
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Smoothing weight must stay in [0, 1) so new samples always count
    fn clamp_alpha(&mut self) {
        let alpha = self.smoothing_alpha;
        let clamped = if alpha.is_nan() { default_alpha() } else { alpha.clamp(0.0, MAX_ALPHA) };
        if clamped != alpha {
            warn!(configured = %alpha, used = %clamped, "smoothing_alpha_clamped");
            self.smoothing_alpha = clamped;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(self.pixels_per_meter > 0.0) {
            bail!("speed.pixels_per_meter must be positive, got {}", self.pixels_per_meter);
        }
        if self.detect_every_n_frames == 0 {
            bail!("tracking.detect_every_n_frames must be at least 1");
        }
        if self.ocr_queue_capacity == 0 {
            bail!("ocr.queue_capacity must be at least 1");
        }
        if self.metrics_interval_secs == 0 {
            bail!("metrics.interval_secs must be at least 1");
        }
        if self.min_dt_secs < 0.0 {
            bail!("speed.min_dt_secs must not be negative, got {}", self.min_dt_secs);
        }
        Ok(())
    }

    /// Apply SUPABASE_URL / SUPABASE_KEY / SPEED_BUMP_ID when set and non-empty
    pub fn with_env_overrides(mut self) -> Self {
        let read = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        if let Some(url) = read("SUPABASE_URL") {
            self.remote_url = Some(url);
        }
        if let Some(key) = read("SUPABASE_KEY") {
            self.remote_key = Some(key);
        }
        if let Some(id) = read("SPEED_BUMP_ID") {
            self.remote_bump_id = Some(id);
        }
        self
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn quality_floor(&self) -> f64 {
        self.quality_floor
    }

    pub fn detect_every_n_frames(&self) -> u64 {
        self.detect_every_n_frames
    }

    pub fn exit_grace_frames(&self) -> u32 {
        self.exit_grace_frames
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        self.speed_unit
    }

    pub fn pixels_per_meter(&self) -> f64 {
        self.pixels_per_meter
    }

    pub fn smoothing_alpha(&self) -> f64 {
        self.smoothing_alpha
    }

    pub fn min_dt_secs(&self) -> f64 {
        self.min_dt_secs
    }

    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    pub fn policy_mode(&self) -> PolicyMode {
        self.policy_mode
    }

    pub fn geofence_y(&self) -> f64 {
        self.geofence_y
    }

    pub fn actuator_enabled(&self) -> bool {
        self.actuator_enabled
    }

    pub fn actuator_device(&self) -> &str {
        &self.actuator_device
    }

    pub fn actuator_baud(&self) -> u32 {
        self.actuator_baud
    }

    pub fn command_protocol(&self) -> CommandProtocol {
        self.command_protocol
    }

    pub fn resend_interval_ms(&self) -> u64 {
        self.resend_interval_ms
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn remote_key(&self) -> Option<&str> {
        self.remote_key.as_deref()
    }

    pub fn remote_bump_id(&self) -> Option<&str> {
        self.remote_bump_id.as_deref()
    }

    pub fn remote_table(&self) -> &str {
        &self.remote_table
    }

    pub fn remote_timeout_ms(&self) -> u64 {
        self.remote_timeout_ms
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr_enabled
    }

    pub fn ocr_interval_ms(&self) -> u64 {
        self.ocr_interval_ms
    }

    pub fn ocr_queue_capacity(&self) -> usize {
        self.ocr_queue_capacity
    }

    pub fn ocr_min_confidence(&self) -> f64 {
        self.ocr_min_confidence
    }

    pub fn emergency_marker(&self) -> &str {
        &self.emergency_marker
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn event_log_file(&self) -> &str {
        &self.event_log_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to pick the policy variant
    pub fn with_policy_mode(mut self, mode: PolicyMode) -> Self {
        self.policy_mode = mode;
        self
    }

    /// Builder method for tests to set the exit grace counter
    pub fn with_exit_grace_frames(mut self, frames: u32) -> Self {
        self.exit_grace_frames = frames;
        self
    }

    /// Builder method for tests to disable file-backed event logging
    pub fn with_event_log_file(mut self, file: &str) -> Self {
        self.event_log_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.quality_floor(), 7.0);
        assert_eq!(config.detect_every_n_frames(), 5);
        assert_eq!(config.exit_grace_frames(), 0);
        assert_eq!(config.pixels_per_meter(), 35.0);
        assert_eq!(config.smoothing_alpha(), 0.7);
        assert_eq!(config.min_dt_secs(), 0.01);
        assert_eq!(config.speed_limit(), 35.0);
        assert_eq!(config.policy_mode(), PolicyMode::Damage);
        assert_eq!(config.geofence_y(), 400.0);
        assert_eq!(config.command_protocol(), CommandProtocol::SpeedLine);
        assert_eq!(config.resend_interval_ms(), 750);
        assert_eq!(config.emergency_marker(), "MAI");
        assert!(config.remote_url().is_none());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["actibump".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["actibump".to_string(), "--config".to_string(), "config/north.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/north.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["actibump".to_string(), "--config=config/south.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/south.toml");
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[speed]
limit = 50.0

[policy]
mode = "count"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.speed_limit(), 50.0);
        assert_eq!(config.policy_mode(), PolicyMode::Count);
        assert_eq!(config.pixels_per_meter(), 35.0);
        assert_eq!(config.frame_width(), 1280);
    }

    #[test]
    fn test_alpha_is_clamped() {
        let mut config = Config::default();
        config.smoothing_alpha = 1.0;
        config.clamp_alpha();
        assert_eq!(config.smoothing_alpha(), 0.99);

        config.smoothing_alpha = -0.5;
        config.clamp_alpha();
        assert_eq!(config.smoothing_alpha(), 0.0);
    }

    #[test]
    fn test_validate_rejects_non_positive_scale() {
        let mut config = Config::default();
        config.pixels_per_meter = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cadence() {
        let mut config = Config::default();
        config.detect_every_n_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_queue_and_interval() {
        let mut config = Config::default();
        config.ocr_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metrics_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_log_default() {
        let log = EventLogConfig::default();
        assert_eq!(log.file, "events.jsonl");
        assert_eq!(Config::default().event_log_file(), "events.jsonl");
    }
}
