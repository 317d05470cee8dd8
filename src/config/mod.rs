//! Room configuration
//!
//! Loaded from `config.json` in the OS config directory (or the directory
//! named by `COUCHROOM_CONFIG`). A missing file means defaults.

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default port for couchroom hosts
pub const DEFAULT_PORT: u16 = 55333;

/// Default cap on local players per session (one per split-screen key layout)
pub const DEFAULT_MAX_LOCAL_PLAYERS: u32 = 4;

/// Default cap on slot name length, in characters
pub const DEFAULT_MAX_NAME_LEN: usize = 24;

const CONFIG_FILE: &str = "config.json";

static CONFIG_DIR_OVERRIDE: Lazy<Option<PathBuf>> =
    Lazy::new(|| std::env::var_os("COUCHROOM_CONFIG").map(PathBuf::from));

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not determine config directory")]
    NoConfigDirectory,
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Who counts as ready.
///
/// The two modes are not interchangeable: a room runs in exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyMode {
    /// A session is ready when every one of its slots is ready
    #[default]
    SlotsOnly,
    /// A session additionally needs its own session-level flag set
    SessionAndSlots,
}

/// Settings for one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Maximum local player slots per session
    pub max_local_players: u32,
    /// Slots appended automatically when a session joins
    pub initial_local_players: u32,
    /// Readiness semantics
    pub ready_mode: ReadyMode,
    /// TCP port the host tries first
    pub port: u16,
    /// Names are truncated to this many characters
    pub max_name_len: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_local_players: DEFAULT_MAX_LOCAL_PLAYERS,
            initial_local_players: 1,
            ready_mode: ReadyMode::SlotsOnly,
            port: DEFAULT_PORT,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

impl RoomConfig {
    /// Load from the standard location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    /// Load from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)?;
        let config: RoomConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "loaded room config");
        Ok(config)
    }

    /// Write this config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The directory config files live in
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = CONFIG_DIR_OVERRIDE.clone() {
            return Ok(dir);
        }
        ProjectDirs::from("", "", "couchroom")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDirectory)
    }

    /// Reject values the room cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_local_players == 0 {
            return Err(ConfigError::Invalid(
                "max_local_players must be at least 1".to_string(),
            ));
        }
        if self.initial_local_players > self.max_local_players {
            return Err(ConfigError::Invalid(format!(
                "initial_local_players ({}) exceeds max_local_players ({})",
                self.initial_local_players, self.max_local_players
            )));
        }
        if self.max_name_len == 0 {
            return Err(ConfigError::Invalid("max_name_len must be at least 1".to_string()));
        }
        Ok(())
    }
}
