//! Run and device configuration.
//!
//! `RunConfig` carries the per-run choices from the command line (model,
//! source, threshold, resolution, record flag) and is validated once before
//! any resource is opened. `DeviceConfig` carries the deployment wiring
//! (serial ports, destination number, labels, timings) from an optional TOML
//! file plus `WILDWATCH_*` environment overrides.

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::alert::ModemTiming;
use crate::detect::LabelMap;
use crate::error::ConfigError;
use crate::frame::Resolution;
use crate::rate::DEFAULT_WINDOW;
use crate::source::SourceDescriptor;

pub const DEFAULT_THRESHOLD: f32 = 0.8;
const DEFAULT_TARGET_CLASS: &str = "bear";
const DEFAULT_GPS_PORT: &str = "/dev/ttyAMA3";
const DEFAULT_MODEM_PORT: &str = "/dev/ttyAMA0";
const DEFAULT_BAUD: u32 = 9600;
const DEFAULT_GPS_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_MODEM_READ_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MESSAGE_TEMPLATE: &str = "Alert! {label} detected at coordinates: {location}";
const DEFAULT_SNAPSHOT_PATH: &str = "capture.png";
const DEFAULT_RECORDING_PATH: &str = "demo1.avi";
const DEFAULT_RECORDING_FPS: u32 = 30;
const DEFAULT_STREAM_KEY_WAIT_MS: u64 = 5;
const DEFAULT_MAX_READ_FAILURES: u32 = 5;
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_MIN_SCORE: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

// -------------------- Run configuration --------------------

/// Per-run choices. Immutable once validated.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub model: PathBuf,
    pub source: SourceDescriptor,
    /// Detections are drawn and alerted only when `confidence > threshold`.
    pub threshold: f32,
    pub resolution: Option<Resolution>,
    pub record: bool,
}

impl RunConfig {
    /// Validates raw command-line values in the order a run would trip over them:
    /// model, source, threshold, resolution, then recording preconditions.
    pub fn new(
        model: impl Into<PathBuf>,
        source: &str,
        threshold: f32,
        resolution: Option<&str>,
        record: bool,
    ) -> Result<Self, ConfigError> {
        let model = model.into();
        if !model.exists() {
            return Err(ConfigError::ModelNotFound(model));
        }
        let source = SourceDescriptor::parse(source)?;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        let resolution = resolution.map(str::parse::<Resolution>).transpose()?;
        if record {
            if !source.is_streaming() {
                return Err(ConfigError::RecordingRequiresStream);
            }
            if resolution.is_none() {
                return Err(ConfigError::RecordingRequiresResolution);
            }
        }
        if source.requires_resolution() && resolution.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{} needs an explicit --resolution to configure the capture size",
                source
            )));
        }
        Ok(Self {
            model,
            source,
            threshold,
            resolution,
            record,
        })
    }
}

// -------------------- Device configuration (file + env) --------------------

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    target_class: Option<String>,
    labels: Option<Vec<String>>,
    labels_path: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    gps: Option<GpsConfigFile>,
    modem: Option<ModemConfigFile>,
    alerts: Option<AlertsConfigFile>,
    display: Option<DisplayConfigFile>,
    recording: Option<RecordingConfigFile>,
    frame_rate: Option<FrameRateConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_score: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct GpsConfigFile {
    port: Option<String>,
    baud: Option<u32>,
    read_timeout_ms: Option<u64>,
    fix_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModemConfigFile {
    port: Option<String>,
    dry_run: Option<bool>,
    baud: Option<u32>,
    read_timeout_ms: Option<u64>,
    destination: Option<String>,
    probe_settle_ms: Option<u64>,
    mode_settle_ms: Option<u64>,
    address_settle_ms: Option<u64>,
    body_settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    mode: Option<String>,
    message_template: Option<String>,
    retry_failed: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    preview_path: Option<PathBuf>,
    snapshot_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
    stream_key_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    path: Option<PathBuf>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameRateConfigFile {
    window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    max_read_failures: Option<u32>,
}

/// How alert-eligible detections are handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertMode {
    /// Fix wait and dispatch run inside the frame loop iteration.
    Inline,
    /// A worker thread owns the coordinator; the frame loop never blocks on it.
    Background,
    /// Detections are drawn but never alerted.
    Disabled,
}

impl AlertMode {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "background" => Ok(Self::Background),
            "disabled" | "off" => Ok(Self::Disabled),
            other => Err(ConfigError::Invalid(format!(
                "alert mode {:?} is not one of inline, background, disabled",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub input: Resolution,
    pub min_score: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input: Resolution::new(DEFAULT_DETECTOR_INPUT, DEFAULT_DETECTOR_INPUT),
            min_score: DEFAULT_MIN_SCORE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GpsSettings {
    pub port: String,
    pub baud: u32,
    pub read_timeout: Duration,
    /// `None` waits for a usable fix indefinitely.
    pub fix_timeout: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModemSettings {
    /// `None` logs alerts instead of transmitting them.
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout: Duration,
    pub destination: Option<String>,
    pub timing: ModemTiming,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertSettings {
    pub mode: AlertMode,
    pub message_template: String,
    /// Leave the dedup state untouched when a send fails so the next detection retries.
    pub retry_failed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisplaySettings {
    pub preview_path: Option<PathBuf>,
    pub snapshot_path: PathBuf,
    pub font_path: Option<PathBuf>,
    pub stream_key_wait: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSettings {
    pub path: PathBuf,
    pub fps: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub target_class: String,
    pub labels: LabelMap,
    pub detector: DetectorSettings,
    pub gps: GpsSettings,
    pub modem: ModemSettings,
    pub alerts: AlertSettings,
    pub display: DisplaySettings,
    pub recording: RecordingSettings,
    pub frame_rate_window: usize,
    pub max_read_failures: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::from_file(DeviceConfigFile::default()).expect("built-in defaults are valid")
    }
}

impl DeviceConfig {
    /// Loads `explicit`, else `$WILDWATCH_CONFIG`, else built-in defaults; then
    /// applies environment overrides and validates.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("WILDWATCH_CONFIG").ok().map(PathBuf::from);
        let path = explicit.map(Path::to_path_buf).or(env_path);
        let file_cfg = match path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => DeviceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DeviceConfigFile) -> Result<Self> {
        let labels = match (file.labels, file.labels_path) {
            (Some(names), _) => LabelMap::new(names),
            (None, Some(path)) => LabelMap::from_file(&path)?,
            (None, None) => LabelMap::new(vec![DEFAULT_TARGET_CLASS.to_string()]),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            input: Resolution::new(
                detector_file.input_width.unwrap_or(DEFAULT_DETECTOR_INPUT),
                detector_file.input_height.unwrap_or(DEFAULT_DETECTOR_INPUT),
            ),
            min_score: detector_file.min_score.unwrap_or(DEFAULT_MIN_SCORE),
            iou_threshold: detector_file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
        };

        let gps_file = file.gps.unwrap_or_default();
        let gps = GpsSettings {
            port: gps_file.port.unwrap_or_else(|| DEFAULT_GPS_PORT.to_string()),
            baud: gps_file.baud.unwrap_or(DEFAULT_BAUD),
            read_timeout: Duration::from_millis(
                gps_file.read_timeout_ms.unwrap_or(DEFAULT_GPS_READ_TIMEOUT_MS),
            ),
            fix_timeout: fix_timeout_from_secs(gps_file.fix_timeout_secs),
        };

        let modem_file = file.modem.unwrap_or_default();
        let default_timing = ModemTiming::default();
        let modem = ModemSettings {
            port: if modem_file.dry_run.unwrap_or(false) {
                None
            } else {
                Some(
                    modem_file
                        .port
                        .unwrap_or_else(|| DEFAULT_MODEM_PORT.to_string()),
                )
            },
            baud: modem_file.baud.unwrap_or(DEFAULT_BAUD),
            read_timeout: Duration::from_millis(
                modem_file
                    .read_timeout_ms
                    .unwrap_or(DEFAULT_MODEM_READ_TIMEOUT_MS),
            ),
            destination: modem_file.destination,
            timing: ModemTiming {
                probe_settle: modem_file
                    .probe_settle_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timing.probe_settle),
                mode_settle: modem_file
                    .mode_settle_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timing.mode_settle),
                address_settle: modem_file
                    .address_settle_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timing.address_settle),
                body_settle: modem_file
                    .body_settle_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timing.body_settle),
            },
        };

        let alerts_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            mode: match alerts_file.mode.as_deref() {
                Some(mode) => AlertMode::parse(mode)?,
                None => AlertMode::Inline,
            },
            message_template: alerts_file
                .message_template
                .unwrap_or_else(|| DEFAULT_MESSAGE_TEMPLATE.to_string()),
            retry_failed: alerts_file.retry_failed.unwrap_or(false),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            preview_path: display_file.preview_path,
            snapshot_path: display_file
                .snapshot_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
            font_path: display_file.font_path,
            stream_key_wait: Duration::from_millis(
                display_file
                    .stream_key_wait_ms
                    .unwrap_or(DEFAULT_STREAM_KEY_WAIT_MS),
            ),
        };

        let recording_file = file.recording.unwrap_or_default();
        let recording = RecordingSettings {
            path: recording_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_PATH)),
            fps: recording_file.fps.unwrap_or(DEFAULT_RECORDING_FPS),
        };

        Ok(Self {
            target_class: file
                .target_class
                .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string()),
            labels,
            detector,
            gps,
            modem,
            alerts,
            display,
            recording,
            frame_rate_window: file
                .frame_rate
                .and_then(|f| f.window)
                .unwrap_or(DEFAULT_WINDOW),
            max_read_failures: file
                .source
                .and_then(|s| s.max_read_failures)
                .unwrap_or(DEFAULT_MAX_READ_FAILURES),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = non_empty_env("WILDWATCH_GPS_PORT") {
            self.gps.port = port;
        }
        if let Some(port) = non_empty_env("WILDWATCH_MODEM_PORT") {
            self.modem.port = Some(port);
        }
        if let Some(number) = non_empty_env("WILDWATCH_ALERT_NUMBER") {
            self.modem.destination = Some(number);
        }
        if let Some(class) = non_empty_env("WILDWATCH_TARGET_CLASS") {
            self.target_class = class;
        }
        if let Some(mode) = non_empty_env("WILDWATCH_ALERT_MODE") {
            self.alerts.mode = AlertMode::parse(&mode)?;
        }
        if let Some(timeout) = non_empty_env("WILDWATCH_FIX_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("WILDWATCH_FIX_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.gps.fix_timeout = fix_timeout_from_secs(Some(seconds));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.target_class = self.target_class.trim().to_string();
        if self.target_class.is_empty() {
            return Err(ConfigError::Invalid("target_class must not be empty".into()).into());
        }
        if !(0..self.labels.len()).any(|i| self.labels.is_class(i, &self.target_class)) {
            log::warn!(
                "target class {:?} is not among the configured labels; no detection will alert",
                self.target_class
            );
        }
        if self.frame_rate_window == 0 {
            return Err(ConfigError::Invalid("frame_rate.window must be at least 1".into()).into());
        }
        if self.recording.fps == 0 {
            return Err(ConfigError::Invalid("recording.fps must be at least 1".into()).into());
        }
        if self.max_read_failures == 0 {
            return Err(
                ConfigError::Invalid("source.max_read_failures must be at least 1".into()).into(),
            );
        }
        if !self.alerts.message_template.contains("{location}") {
            return Err(ConfigError::Invalid(
                "alerts.message_template must contain {location}".into(),
            )
            .into());
        }
        // A missing number is reported when the modem is opened.
        if let Some(number) = self.modem.destination.as_deref() {
            if !is_valid_destination(number) {
                return Err(ConfigError::Invalid(format!(
                    "modem.destination {:?} is not a phone number",
                    number
                ))
                .into());
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DeviceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn fix_timeout_from_secs(seconds: Option<u64>) -> Option<Duration> {
    seconds.filter(|s| *s > 0).map(Duration::from_secs)
}

/// International or national number: optional `+` then 3 to 15 digits.
pub fn is_valid_destination(number: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\+?[0-9]{3,15}$").unwrap())
        .is_match(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_file() -> tempfile::NamedTempFile {
        tempfile::Builder::new()
            .suffix(".jsonl")
            .tempfile()
            .expect("model file")
    }

    #[test]
    fn run_config_rejects_missing_model_first() {
        let err = RunConfig::new("/nonexistent/best.onnx", "nowhere.jpg", 0.5, None, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ModelNotFound(_)));
    }

    #[test]
    fn run_config_validates_threshold_range() {
        let model = model_file();
        let dir = tempfile::tempdir().expect("dir");
        let source = dir.path().to_str().unwrap();
        for bad in [0.0, -0.1, 1.01, f32::NAN] {
            let err = RunConfig::new(model.path(), source, bad, None, false).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidThreshold(_)));
        }
        assert!(RunConfig::new(model.path(), source, 1.0, None, false).is_ok());
    }

    #[test]
    fn recording_needs_stream_and_resolution() {
        let model = model_file();
        let dir = tempfile::tempdir().expect("dir");
        let folder = dir.path().to_str().unwrap();
        assert_eq!(
            RunConfig::new(model.path(), folder, 0.5, Some("640x480"), true).unwrap_err(),
            ConfigError::RecordingRequiresStream
        );
        assert_eq!(
            RunConfig::new(model.path(), "usb0", 0.5, None, true).unwrap_err(),
            ConfigError::RecordingRequiresResolution
        );
        let cfg = RunConfig::new(model.path(), "usb0", 0.5, Some("640x480"), true).unwrap();
        assert_eq!(cfg.resolution, Some(Resolution::new(640, 480)));
    }

    #[test]
    fn camera_module_needs_resolution() {
        let model = model_file();
        let err = RunConfig::new(model.path(), "picamera0", 0.5, None, false).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn defaults_are_consistent() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.target_class, "bear");
        assert!(cfg.labels.is_class(0, "bear"));
        assert_eq!(cfg.gps.baud, 9600);
        assert_eq!(cfg.gps.fix_timeout, None);
        assert_eq!(cfg.alerts.mode, AlertMode::Inline);
        assert!(!cfg.alerts.retry_failed);
        assert_eq!(cfg.display.snapshot_path, PathBuf::from("capture.png"));
        assert_eq!(cfg.recording.path, PathBuf::from("demo1.avi"));
        assert_eq!(cfg.recording.fps, 30);
        assert_eq!(cfg.frame_rate_window, 200);
    }

    #[test]
    fn alert_mode_parsing() {
        assert_eq!(AlertMode::parse("Background"), Ok(AlertMode::Background));
        assert_eq!(AlertMode::parse("off"), Ok(AlertMode::Disabled));
        assert!(AlertMode::parse("sometimes").is_err());
    }

    #[test]
    fn destination_numbers() {
        assert!(is_valid_destination("+40712345678"));
        assert!(is_valid_destination("0712345678"));
        assert!(!is_valid_destination("+40 712"));
        assert!(!is_valid_destination("\"+4071\";ATH"));
    }
}
