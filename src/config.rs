//! Configuration file handling for camfeed.
//!
//! Loads configuration from `~/.config/camfeed/config.toml` or a custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::camera::{CameraSettings, Resolution};

/// Configuration file structure for camfeed.
/// Loaded from ~/.config/camfeed/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    /// Capture device node
    #[serde(default = "default_device")]
    pub device: PathBuf,
    /// Requested capture width (the device may grant something else)
    #[serde(default = "default_width")]
    pub width: u32,
    /// Requested capture height
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/video0")
}

fn default_width() -> u32 {
    Resolution::QCIF.width
}

fn default_height() -> u32 {
    Resolution::QCIF.height
}

fn default_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config/camfeed/config.toml"),
        None => PathBuf::from(".config/camfeed/config.toml"),
    }
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Camera settings derived from this config.
    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            device_path: self.camera.device.clone(),
            resolution: Resolution {
                width: self.camera.width,
                height: self.camera.height,
            },
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
