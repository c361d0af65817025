use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bitmap;

/// Upper bound on frames per run
pub const MAX_FRAME_COUNT: u32 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("capture width and height must be non-zero (got {width}x{height})")]
    EmptyRectangle { width: u32, height: u32 },
    #[error("capture rectangle {width}x{height} is too large for a 24-bit bitmap")]
    RectangleTooLarge { width: u32, height: u32 },
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("frame count {0} exceeds the limit of {MAX_FRAME_COUNT}")]
    TooManyFrames(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture rectangle width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Capture rectangle height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Number of screenshots to take
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,

    /// Concurrent capture workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Destination directory for the .bmp files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}
fn default_frame_count() -> u32 {
    30
}
fn default_worker_count() -> usize {
    2
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_count: default_frame_count(),
            worker_count: default_worker_count(),
            output_dir: default_output_dir(),
        }
    }
}

impl CaptureConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "bmpshot", "bmpshot") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("bmpshot-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Reject settings no frame could be captured with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyRectangle {
                width: self.width,
                height: self.height,
            });
        }
        if bitmap::headers_for(self.width, self.height).is_err() {
            return Err(ConfigError::RectangleTooLarge {
                width: self.width,
                height: self.height,
            });
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.frame_count > MAX_FRAME_COUNT {
            return Err(ConfigError::TooManyFrames(self.frame_count));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.frame_count, 30);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"width": 800, "output_dir": "shots"}"#).unwrap();
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 1080);
        assert_eq!(config.frame_count, 30);
        assert_eq!(config.output_dir, PathBuf::from("shots"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = CaptureConfig {
            width: 640,
            height: 480,
            frame_count: 5,
            worker_count: 4,
            output_dir: PathBuf::from("/tmp/out"),
        };
        config.save(&path).unwrap();
        assert_eq!(CaptureConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(CaptureConfig::load(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let empty = CaptureConfig {
            height: 0,
            ..Default::default()
        };
        assert_eq!(
            empty.validate(),
            Err(ConfigError::EmptyRectangle {
                width: 1920,
                height: 0
            })
        );

        let huge = CaptureConfig {
            width: 100_000,
            height: 100_000,
            ..Default::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::RectangleTooLarge { .. })
        ));

        let idle = CaptureConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert_eq!(idle.validate(), Err(ConfigError::NoWorkers));

        let endless = CaptureConfig {
            frame_count: u32::MAX,
            ..Default::default()
        };
        assert_eq!(
            endless.validate(),
            Err(ConfigError::TooManyFrames(u32::MAX))
        );

        let at_limit = CaptureConfig {
            frame_count: MAX_FRAME_COUNT,
            ..Default::default()
        };
        assert_eq!(at_limit.validate(), Ok(()));
    }

    #[test]
    fn test_zero_frames_is_valid() {
        let config = CaptureConfig {
            frame_count: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
