//! Configuration module for MCU Link
//!
//! This module handles persisted configuration:
//! - Settings (`config.toml`): probe, acquisition and display options
//! - Application state (`app_state.json`): last probe and target, UI preferences
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.mcu-link.mcu-link/`
//! - **macOS**: `~/Library/Application Support/dev.mcu-link.mcu-link/`
//! - **Windows**: `%APPDATA%\dev.mcu-link.mcu-link\`
//!
//! Log files are written to a `logs/` directory inside it.
//!
//! # Example
//!
//! ```ignore
//! use mcu_link::config::{AppConfig, AppState};
//!
//! let config = AppConfig::load_or_default();
//! let mut state = AppState::load_or_default();
//! state.update_last_connection("STM32H735ZGTx", Some("0483:374e:002A"));
//! state.save()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{McuLinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.mcu-link.mcu-link";

/// Settings filename
pub const CONFIG_FILE: &str = "config.toml";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Log directory name inside the app data directory
pub const LOG_DIR: &str = "logs";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        McuLinkError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            McuLinkError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

pub fn log_dir() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(LOG_DIR))
}

// ==================== App State ====================

/// State remembered between runs, separate from the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migration support
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// Serial number of the last probe connected to
    #[serde(default)]
    pub last_probe_serial: Option<String>,

    /// Last target chosen in manual target selection
    #[serde(default)]
    pub last_target_chip: Option<String>,

    #[serde(default = "default_true")]
    pub dark_mode: bool,
}

fn default_app_state_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            last_probe_serial: None,
            last_target_chip: None,
            dark_mode: true,
        }
    }
}

impl AppState {
    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| McuLinkError::Config(format!("Failed to read app state: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| McuLinkError::Config(format!("Failed to parse app state: {}", e)))
    }

    /// Load app state from the default location
    pub fn load() -> Result<Self> {
        let path = app_state_path().ok_or_else(|| {
            McuLinkError::Config("Could not determine app state path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load app state, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            McuLinkError::Serialization(format!("Failed to serialize app state: {}", e))
        })?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| McuLinkError::Config(format!("Failed to write app state: {}", e)))
    }

    /// Save app state to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(APP_STATE_FILE))
    }

    /// Remember what was just connected to
    pub fn update_last_connection(&mut self, target_chip: &str, probe_serial: Option<&str>) {
        self.last_target_chip = Some(target_chip.to_string());
        self.last_probe_serial = probe_serial.map(|s| s.to_string());
    }
}

// ==================== Tests ====================
