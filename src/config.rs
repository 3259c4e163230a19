//! Viewer configuration, loaded from YAML.
//!
//! Every field is optional; the defaults reproduce the fixed behavior of the
//! viewer (camera 0, contour variant, Canny 10/30, blue fill, quit on `q`).

use crate::capture::CaptureConfig;
use crate::pipeline::{ContourParams, Variant, DEFAULT_CANNY_HIGH, DEFAULT_CANNY_LOW, DEFAULT_FILL_COLOR};
use crate::runner::LoopSettings;
use image::Rgb;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Camera device index
    pub device_index: u32,
    /// Processing pipeline
    pub variant: Variant,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Fill color in RGB order
    pub fill_color: [u8; 3],
    pub quit_key: char,
    /// Key poll timeout between frames
    pub poll_interval_ms: u64,
    /// Overrides the variant's window title
    pub window_title: Option<String>,
    /// Stop after this many displayed frames
    pub max_frames: Option<u64>,
    /// Give up after this many failed reads in a row
    pub max_consecutive_failures: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_index: 0,
            variant: Variant::Contours,
            canny_low: DEFAULT_CANNY_LOW,
            canny_high: DEFAULT_CANNY_HIGH,
            fill_color: DEFAULT_FILL_COLOR,
            quit_key: 'q',
            poll_interval_ms: 1,
            window_title: None,
            max_frames: None,
            max_consecutive_failures: None,
        }
    }
}

impl Config {
    /// Reads and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates YAML text. Empty text yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str::<Config>(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.canny_low.is_finite() && self.canny_high.is_finite()) {
            return Err(ConfigError::Invalid("canny thresholds must be finite".into()));
        }
        if self.canny_low < 0.0 || self.canny_high < 0.0 {
            return Err(ConfigError::Invalid("canny thresholds must not be negative".into()));
        }
        if self.canny_low > self.canny_high {
            return Err(ConfigError::Invalid(format!(
                "canny_low ({}) is above canny_high ({})",
                self.canny_low, self.canny_high
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()));
        }
        if self.quit_key.is_control() {
            return Err(ConfigError::Invalid("quit_key must be a printable character".into()));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(ConfigError::Invalid("max_consecutive_failures must be at least 1".into()));
        }
        Ok(())
    }

    pub fn window_title(&self) -> String {
        self.window_title
            .clone()
            .unwrap_or_else(|| self.variant.window_title().to_string())
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device_index: self.device_index,
        }
    }

    pub fn contour_params(&self) -> ContourParams {
        ContourParams {
            canny_low: self.canny_low,
            canny_high: self.canny_high,
            fill_color: Rgb(self.fill_color),
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            quit_key: self.quit_key,
            poll_timeout: Duration::from_millis(self.poll_interval_ms),
            max_frames: self.max_frames,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_pipeline() {
        let config = Config::default();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.variant, Variant::Contours);
        assert_eq!(config.contour_params(), ContourParams::default());
        assert_eq!(config.contour_params().fill_color, Rgb([0, 0, 255]));
        assert_eq!(config.quit_key, 'q');
        assert_eq!(config.loop_settings().poll_timeout, Duration::from_millis(1));
        assert_eq!(config.window_title(), "output");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml("variant: grayscale\nmax_frames: 5\n").unwrap();
        assert_eq!(config.variant, Variant::Grayscale);
        assert_eq!(config.max_frames, Some(5));
        assert_eq!(config.canny_low, 10.0);
        assert_eq!(config.window_title(), "webcam");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_title_override() {
        let config = Config::from_yaml("window_title: preview").unwrap();
        assert_eq!(config.window_title(), "preview");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = Config::from_yaml("canny_low: 50\ncanny_high: 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(matches!(
            Config::from_yaml("poll_interval_ms: 0").unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::from_yaml("thresholds: [1, 2]").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/edgecam.yaml")).unwrap_err();
        assert!(err.to_string().contains("edgecam.yaml"));
    }
}
