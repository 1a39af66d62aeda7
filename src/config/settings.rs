//! Persistent settings stored in `config.toml`
//!
//! # Sections
//!
//! - [`ProbeConfig`] - Which chip to attach to and how
//! - [`AcquisitionConfig`] - Poll rate, buffer size, retry policy, discovery
//! - [`DisplayConfig`] - Default plot window and layout
//!
//! Every field has a serde default, so a partial file (or an empty one)
//! loads cleanly and missing values take their defaults.

use crate::acquisition::WindowSpec;
use crate::error::{McuLinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default descriptor table location in flash
pub const DEFAULT_DESCRIPTOR_ADDRESS: u64 = 0x080F_0000;

/// Poll rates offered by the viewer, in milliseconds
pub const POLL_RATE_CHOICES_MS: [u64; 5] = [0, 1, 10, 100, 1000];

/// Top-level application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub probe: ProbeConfig,
    pub acquisition: AcquisitionConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Parse from TOML text and validate
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| McuLinkError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| McuLinkError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| McuLinkError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Load from the app data directory
    pub fn load() -> Result<Self> {
        let path = super::config_path().ok_or_else(|| {
            McuLinkError::Config("Could not determine config path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| McuLinkError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn save(&self) -> Result<()> {
        let dir = super::ensure_app_data_dir()?;
        self.save_to(dir.join(super::CONFIG_FILE))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.buffer_capacity == 0 {
            return Err(McuLinkError::Config(
                "acquisition.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.acquisition.max_connect_attempts == 0 {
            return Err(McuLinkError::Config(
                "acquisition.max_connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.probe.speed_khz == 0 {
            return Err(McuLinkError::Config("probe.speed_khz must be positive".to_string()));
        }
        match self.display.window {
            WindowSpec::TimeSpan { seconds } if !(seconds.is_finite() && seconds > 0.0) => {
                Err(McuLinkError::Config(format!(
                    "display.window time span must be positive, got {}",
                    seconds
                )))
            }
            WindowSpec::Count { samples: 0 } => Err(McuLinkError::Config(
                "display.window sample count must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// ==================== Probe ====================

/// Debug probe connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Target chip name (e.g., "STM32H735ZGTx")
    pub target_chip: String,

    /// Communication speed in kHz
    pub speed_khz: u32,

    pub protocol: ProbeProtocol,

    /// Hold the target in reset while attaching
    pub connect_under_reset: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_chip: "STM32H735ZGTx".to_string(),
            speed_khz: 4000,
            protocol: ProbeProtocol::Swd,
            connect_under_reset: false,
        }
    }
}

/// Probe protocol options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProbeProtocol {
    /// Serial Wire Debug
    #[default]
    Swd,
    Jtag,
}

impl std::fmt::Display for ProbeProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeProtocol::Swd => write!(f, "SWD"),
            ProbeProtocol::Jtag => write!(f, "JTAG"),
        }
    }
}

// ==================== Acquisition ====================

/// Polling, buffering and connection policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Spacing between poll cycle starts; 0 polls back to back
    pub poll_interval_ms: u64,

    /// Samples kept per variable
    pub buffer_capacity: usize,

    pub max_connect_attempts: u32,

    pub retry_delay_ms: u64,

    /// Where discovery looks for the descriptor table
    pub descriptor_address: u64,

    /// Discover variables right after connecting
    pub auto_discover: bool,

    pub rtt_status_interval_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            buffer_capacity: 1000,
            max_connect_attempts: 3,
            retry_delay_ms: 1000,
            descriptor_address: DEFAULT_DESCRIPTOR_ADDRESS,
            auto_discover: true,
            rtt_status_interval_ms: 2000,
        }
    }
}

// ==================== Display ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Plot height in points
    pub plot_height: f32,

    pub show_legend: bool,

    /// Window applied to every plot
    pub window: WindowSpec,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            plot_height: 160.0,
            show_legend: true,
            window: WindowSpec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.acquisition.poll_interval_ms, 100);
        assert_eq!(config.acquisition.max_connect_attempts, 3);
        assert_eq!(config.acquisition.descriptor_address, 0x080F_0000);
        assert_eq!(config.display.window, WindowSpec::TimeSpan { seconds: 10.0 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [acquisition]
            poll_interval_ms = 10

            [display.window]
            mode = "count"
            samples = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.acquisition.poll_interval_ms, 10);
        assert_eq!(config.acquisition.buffer_capacity, 1000);
        assert_eq!(config.display.window, WindowSpec::Count { samples: 500 });
        assert_eq!(config.probe, ProbeConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = AppConfig::from_toml("[acquisition]\nbuffer_capacity = 0\n").unwrap_err();
        assert!(matches!(err, McuLinkError::Config(_)));

        let mut config = AppConfig::default();
        config.acquisition.max_connect_attempts = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.display.window = WindowSpec::TimeSpan { seconds: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.probe.target_chip = "STM32F407VGTx".to_string();
        config.probe.protocol = ProbeProtocol::Jtag;
        config.acquisition.poll_interval_ms = 0;
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
