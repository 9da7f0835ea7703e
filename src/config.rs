// Configuration file (deq2496.yml).
//
// Read once at startup. A missing or invalid file is never fatal: we log it
// and continue with `Config::default()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{DEFAULT_DEVICE_ID, Screen};

pub const CONFIG_FILE_NAME: &str = "deq2496.yml";
pub const CONTRAST_LIMIT: u8 = 15;

#[derive(Debug, Error)]
pub enum ConfigReadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Substring of the MIDI port name the DEQ2496 is attached to.
    #[serde(default)]
    pub midi_device: String,
    #[serde(default)]
    pub default: Defaults,
    #[serde(default = "default_contrast_min")]
    pub contrast_min: u8,
    #[serde(default = "default_contrast_max")]
    pub contrast_max: u8,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_device_id")]
    pub device_id: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    pub screen: Screen,
    pub contrast: u8,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            screen: Screen::Rta,
            contrast: 9,
        }
    }
}

fn default_contrast_min() -> u8 {
    0
}

fn default_contrast_max() -> u8 {
    CONTRAST_LIMIT
}

fn default_response_timeout_ms() -> u64 {
    3000
}

fn default_device_id() -> u8 {
    DEFAULT_DEVICE_ID
}

impl Default for Config {
    fn default() -> Self {
        Config {
            midi_device: String::new(),
            default: Defaults::default(),
            contrast_min: default_contrast_min(),
            contrast_max: default_contrast_max(),
            response_timeout_ms: default_response_timeout_ms(),
            device_id: default_device_id(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigReadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            serde_yaml::from_str(&contents).map_err(|source| ConfigReadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path`, falling back to the built-in defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigReadError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("No config at {}, using built-in defaults", path.display());
                Config::default()
            }
            Err(err) => {
                warn!("{}; using built-in defaults", err);
                Config::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigReadError> {
        if self.contrast_min > self.contrast_max {
            return Err(ConfigReadError::Invalid(format!(
                "contrast_min ({}) is above contrast_max ({})",
                self.contrast_min, self.contrast_max
            )));
        }
        if self.contrast_max > CONTRAST_LIMIT {
            return Err(ConfigReadError::Invalid(format!(
                "contrast_max must be at most {}",
                CONTRAST_LIMIT
            )));
        }
        if self.default.contrast > CONTRAST_LIMIT {
            return Err(ConfigReadError::Invalid(format!(
                "default contrast must be at most {}",
                CONTRAST_LIMIT
            )));
        }
        if self.device_id > 0x0F {
            return Err(ConfigReadError::Invalid(format!(
                "device_id must be 0-15, got {}",
                self.device_id
            )));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// `<config dir>/deq2496/deq2496.yml`, or the working directory if the
/// platform has no config dir.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("deq2496"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}
