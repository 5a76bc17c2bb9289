//! Capture options and service configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Camera facing direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    /// Front-facing camera (selfie)
    Front,
    /// Back-facing camera (main)
    #[default]
    Back,
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensFacing::Front => f.write_str("front"),
            LensFacing::Back => f.write_str("back"),
        }
    }
}

impl FromStr for LensFacing {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(LensFacing::Front),
            "back" => Ok(LensFacing::Back),
            other => Err(ConfigError::Invalid(format!(
                "camera position must be \"front\" or \"back\", got {:?}",
                other
            ))),
        }
    }
}

pub const DEFAULT_WIDTH: u32 = 352;
pub const DEFAULT_HEIGHT: u32 = 288;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_THUMBNAIL_RATIO: f32 = 1.0 / 6.0;

/// Requested capture parameters, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    pub lens_facing: LensFacing,
    pub target_width: u32,
    pub target_height: u32,
    pub target_fps: u32,
    pub flash_enabled: bool,
    pub has_thumbnail: bool,
    /// Uniform thumbnail scale in (0, 1]
    pub thumbnail_ratio: f32,
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            lens_facing: LensFacing::Back,
            target_width: DEFAULT_WIDTH,
            target_height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_FPS,
            flash_enabled: false,
            has_thumbnail: false,
            thumbnail_ratio: DEFAULT_THUMBNAIL_RATIO,
        }
    }
}

impl CaptureConfiguration {
    /// Parses caller options leniently.
    ///
    /// Recognized keys are `cameraPosition`, `width`, `height`, `fps`,
    /// `flashMode`, `hasThumbnail` and `thumbnailRatio`. Anything missing,
    /// mistyped or out of range keeps its default instead of failing.
    pub fn from_options(options: &Value) -> Self {
        let mut config = Self::default();

        let Some(map) = options.as_object() else {
            return config;
        };

        if let Some(facing) = map
            .get("cameraPosition")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
        {
            config.lens_facing = facing;
        }

        if let Some(width) = positive_u32(map.get("width")) {
            config.target_width = width;
        }
        if let Some(height) = positive_u32(map.get("height")) {
            config.target_height = height;
        }
        if let Some(fps) = positive_u32(map.get("fps")) {
            config.target_fps = fps;
        }
        if let Some(flash) = lenient_bool(map.get("flashMode")) {
            config.flash_enabled = flash;
        }
        if let Some(thumbnail) = lenient_bool(map.get("hasThumbnail")) {
            config.has_thumbnail = thumbnail;
        }
        if let Some(ratio) = lenient_f64(map.get("thumbnailRatio")) {
            config.thumbnail_ratio = ratio as f32;
        }

        config.sanitized()
    }

    /// Replaces out-of-range fields with their defaults.
    ///
    /// Sizes and frame rate must be non-zero and the thumbnail ratio must
    /// lie in (0, 1].
    pub fn sanitized(mut self) -> Self {
        if self.target_width == 0 {
            warn!("Target width is zero, using default");
            self.target_width = DEFAULT_WIDTH;
        }
        if self.target_height == 0 {
            warn!("Target height is zero, using default");
            self.target_height = DEFAULT_HEIGHT;
        }
        if self.target_fps == 0 {
            warn!("Target fps is zero, using default");
            self.target_fps = DEFAULT_FPS;
        }
        if !(self.thumbnail_ratio > 0.0 && self.thumbnail_ratio <= 1.0) {
            warn!(ratio = self.thumbnail_ratio, "Thumbnail ratio out of range, using default");
            self.thumbnail_ratio = DEFAULT_THUMBNAIL_RATIO;
        }
        self
    }

    /// Same settings pointed at another camera
    pub fn with_facing(&self, facing: LensFacing) -> Self {
        Self {
            lens_facing: facing,
            ..self.clone()
        }
    }
}

fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn positive_u32(value: Option<&Value>) -> Option<u32> {
    let v = lenient_f64(value)?;
    if v >= 1.0 && v <= u32::MAX as f64 {
        Some(v as u32)
    } else {
        None
    }
}

fn lenient_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" | "on" => Some(true),
            "false" | "off" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub capture: CaptureSettings,

    /// Synthetic camera used by the demo binary
    #[serde(default)]
    pub device: TestPatternSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            capture: CaptureSettings::default(),
            device: TestPatternSettings::default(),
        }
    }
}

/// Pipeline and storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Directory receiving the rolling JPEG files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum frames in the encode/persist pipeline at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Depth of the device event queue
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_in_flight: default_max_in_flight(),
            event_capacity: default_event_capacity(),
            jpeg_quality: default_quality(),
        }
    }
}

/// Test pattern camera description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPatternSettings {
    /// Cameras to expose, one per facing
    #[serde(default = "default_cameras")]
    pub cameras: Vec<LensFacing>,

    /// Sensor mount angle in degrees (0, 90, 180 or 270)
    #[serde(default = "default_sensor_orientation")]
    pub sensor_orientation: u32,

    /// Supported output sizes as [width, height]
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<[u32; 2]>,

    /// Supported frame rate ranges in milli-fps as [min, max]
    #[serde(default = "default_fps_ranges")]
    pub fps_ranges: Vec<[u32; 2]>,
}

impl Default for TestPatternSettings {
    fn default() -> Self {
        Self {
            cameras: default_cameras(),
            sensor_orientation: default_sensor_orientation(),
            resolutions: default_resolutions(),
            fps_ranges: default_fps_ranges(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}
fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("rolling-capture")
}
fn default_max_in_flight() -> usize {
    4
}
fn default_event_capacity() -> usize {
    8
}
fn default_quality() -> u8 {
    85
}
fn default_cameras() -> Vec<LensFacing> {
    vec![LensFacing::Back, LensFacing::Front]
}
fn default_sensor_orientation() -> u32 {
    90
}
fn default_resolutions() -> Vec<[u32; 2]> {
    vec![[320, 240], [640, 480], [1280, 720]]
}
fn default_fps_ranges() -> Vec<[u32; 2]> {
    vec![[15000, 15000], [30000, 30000]]
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;

        if capture.max_in_flight == 0 || capture.max_in_flight > 64 {
            return Err(ConfigError::Invalid(format!(
                "max_in_flight must be between 1 and 64, got {}",
                capture.max_in_flight
            )));
        }

        if capture.event_capacity == 0 || capture.event_capacity > 1024 {
            return Err(ConfigError::Invalid(format!(
                "event_capacity must be between 1 and 1024, got {}",
                capture.event_capacity
            )));
        }

        if capture.jpeg_quality == 0 || capture.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                capture.jpeg_quality
            )));
        }

        self.validate_device(&self.device)
    }

    fn validate_device(&self, device: &TestPatternSettings) -> Result<(), ConfigError> {
        if device.cameras.is_empty() {
            return Err(ConfigError::Invalid(
                "device: at least one camera is required".to_string(),
            ));
        }

        if device.sensor_orientation % 90 != 0 || device.sensor_orientation >= 360 {
            return Err(ConfigError::Invalid(format!(
                "device: sensor_orientation must be 0, 90, 180 or 270, got {}",
                device.sensor_orientation
            )));
        }

        if device.resolutions.iter().any(|[w, h]| *w == 0 || *h == 0) {
            return Err(ConfigError::Invalid(
                "device: resolutions must be non-zero".to_string(),
            ));
        }

        if device.fps_ranges.iter().any(|[min, max]| min > max) {
            return Err(ConfigError::Invalid(
                "device: fps range minimum exceeds maximum".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = CaptureConfiguration::default();
        assert_eq!(config.lens_facing, LensFacing::Back);
        assert_eq!((config.target_width, config.target_height), (352, 288));
        assert_eq!(config.target_fps, 30);
        assert!(!config.flash_enabled);
        assert!(!config.has_thumbnail);
    }

    #[test]
    fn test_options_parsed() {
        let config = CaptureConfiguration::from_options(&json!({
            "cameraPosition": "front",
            "width": 640,
            "height": "480",
            "fps": 15,
            "flashMode": true,
            "hasThumbnail": true,
            "thumbnailRatio": 0.5
        }));

        assert_eq!(config.lens_facing, LensFacing::Front);
        assert_eq!((config.target_width, config.target_height), (640, 480));
        assert_eq!(config.target_fps, 15);
        assert!(config.flash_enabled);
        assert!(config.has_thumbnail);
        assert_eq!(config.thumbnail_ratio, 0.5);
    }

    #[test]
    fn test_invalid_options_fall_back_to_defaults() {
        let config = CaptureConfiguration::from_options(&json!({
            "cameraPosition": "sideways",
            "width": -10,
            "height": 0,
            "fps": "fast",
            "hasThumbnail": "maybe",
            "thumbnailRatio": 1.5
        }));

        assert_eq!(config, CaptureConfiguration::default());
    }

    #[test]
    fn test_sanitized_clamps_to_defaults() {
        let config = CaptureConfiguration {
            target_width: 0,
            target_height: 480,
            target_fps: 0,
            has_thumbnail: true,
            thumbnail_ratio: 2.0,
            ..Default::default()
        }
        .sanitized();

        assert_eq!((config.target_width, config.target_height), (DEFAULT_WIDTH, 480));
        assert_eq!(config.target_fps, DEFAULT_FPS);
        assert!(config.has_thumbnail);
        assert_eq!(config.thumbnail_ratio, DEFAULT_THUMBNAIL_RATIO);

        let nan = CaptureConfiguration {
            thumbnail_ratio: f32::NAN,
            ..Default::default()
        };
        assert_eq!(nan.sanitized(), CaptureConfiguration::default());
    }

    #[test]
    fn test_valid_configuration_unchanged() {
        let config = CaptureConfiguration {
            lens_facing: LensFacing::Front,
            target_width: 1280,
            target_height: 720,
            target_fps: 15,
            flash_enabled: true,
            has_thumbnail: true,
            thumbnail_ratio: 1.0,
        };
        assert_eq!(config.clone().sanitized(), config);
    }

    #[test]
    fn test_non_object_options() {
        let config = CaptureConfiguration::from_options(&json!([1, 2, 3]));
        assert_eq!(config, CaptureConfiguration::default());
    }

    #[test]
    fn test_with_facing_keeps_other_fields() {
        let config = CaptureConfiguration {
            target_width: 1280,
            has_thumbnail: true,
            ..Default::default()
        };
        let switched = config.with_facing(LensFacing::Front);
        assert_eq!(switched.lens_facing, LensFacing::Front);
        assert_eq!(switched.target_width, 1280);
        assert!(switched.has_thumbnail);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
log_level = "debug"

[capture]
output_dir = "/tmp/frames"
max_in_flight = 2
event_capacity = 16
jpeg_quality = 90

[device]
cameras = ["front"]
sensor_orientation = 270
resolutions = [[640, 480]]
fps_ranges = [[30000, 30000]]
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.capture.output_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(config.capture.max_in_flight, 2);
        assert_eq!(config.capture.event_capacity, 16);
        assert_eq!(config.capture.jpeg_quality, 90);
        assert_eq!(config.device.cameras, vec![LensFacing::Front]);
        assert_eq!(config.device.sensor_orientation, 270);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.capture.max_in_flight, 4);
        assert_eq!(config.device.resolutions.len(), 3);
    }

    #[test]
    fn test_invalid_quality() {
        let toml = r#"
[capture]
jpeg_quality = 0
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_invalid_orientation() {
        let toml = r#"
[device]
sensor_orientation = 45
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::from_str("").unwrap();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = Config::from_str(&toml_str).unwrap();
        assert_eq!(config.capture.max_in_flight, parsed.capture.max_in_flight);
    }
}
