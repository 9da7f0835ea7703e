// Last-known device state, persisted between invocations (~/.deq2496).
//
// Loaded at start, mutated in memory, written back once at the end of a
// successful command. No locking: concurrent runs are last-writer-wins.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::Screen;

pub const STATE_FILE_NAME: &str = ".deq2496";

#[derive(Debug, Error)]
pub enum StateReadError {
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
}

#[derive(Debug, Error)]
pub enum StateWriteError {
    #[error("cannot serialize state: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Screen>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_device: Option<String>,
}

/// Outcome of [`State::save`], reported to the user but never fatal.
#[derive(Debug)]
pub enum SaveStatus {
    Saved(PathBuf),
    Failed(StateWriteError),
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveStatus::Saved(path) => write!(f, "state saved to {}", path.display()),
            SaveStatus::Failed(err) => write!(f, "state not saved: {}", err),
        }
    }
}

impl State {
    pub fn load(path: &Path) -> Result<Self, StateReadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| StateReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // An empty file is an empty mapping.
        if contents.trim().is_empty() {
            return Ok(State::default());
        }

        serde_yaml::from_str(&contents).map_err(|source| StateReadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(state) => state,
            Err(StateReadError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!("No state file at {}, starting empty", path.display());
                State::default()
            }
            Err(err) => {
                warn!("{}; starting with empty state", err);
                State::default()
            }
        }
    }

    fn write(&self, path: &Path) -> Result<(), StateWriteError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| StateWriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> SaveStatus {
        match self.write(path) {
            Ok(()) => SaveStatus::Saved(path.to_path_buf()),
            Err(err) => SaveStatus::Failed(err),
        }
    }
}

/// `~/.deq2496`, or the working directory if there is no home dir.
pub fn default_state_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_FILE_NAME)
}
