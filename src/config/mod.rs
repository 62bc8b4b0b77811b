// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::analysis::{default_shifts, ShiftClock, ShiftWindow};
use crate::input::SimulatorConfig;
use crate::security::SecurityConfig;
use crate::streaming::StreamingConfig;

/// Invalid configuration detected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("shift '{0}' has zero length")]
    EmptyShift(String),

    #[error("shift '{0}' uses number 0, which is reserved for standby")]
    ReservedShiftNumber(String),

    #[error("shift number {0} is configured twice")]
    DuplicateShiftNumber(u8),

    #[error("shifts '{0}' and '{1}' overlap")]
    OverlappingShifts(String, String),

    #[error("no operational shift configured")]
    NoOperationalShift,

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Machine whose events this process records
    pub machine_id: u32,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Use the synthetic input generator instead of the serial transport
    pub simulate: bool,

    pub io: IoConfig,
    pub simulator: SimulatorConfig,
    pub production: ProductionConfig,
    pub downtime: DowntimeConfig,
    pub oee: OeeConfig,
    pub database: DatabaseConfig,
    pub streaming: StreamingConfig,
    pub security: SecurityConfig,

    /// Shift calendar
    pub shifts: Vec<ShiftWindow>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "jointline".to_string(),
            machine_id: 1,
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            simulate: true,
            io: IoConfig::default(),
            simulator: SimulatorConfig::default(),
            production: ProductionConfig::default(),
            downtime: DowntimeConfig::default(),
            oee: OeeConfig::default(),
            database: DatabaseConfig::default(),
            streaming: StreamingConfig::default(),
            security: SecurityConfig::default(),
            shifts: default_shifts(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("jointline"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Database file; relative paths live under `data_dir`
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.data_dir.join(&self.database.path)
        }
    }

    pub fn shift_clock(&self) -> Result<ShiftClock, ConfigError> {
        let clock = ShiftClock::new(self.shifts.clone())?;
        if clock.operational_shift_count() == 0 {
            return Err(ConfigError::NoOperationalShift);
        }
        Ok(clock)
    }

    /// Reject settings the engine cannot run with. A zero or missing
    /// production target is allowed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                message: message.into(),
            }
        }

        if self.io.poll_interval_ms == 0 {
            return Err(invalid("io.poll_interval_ms", "must be greater than zero"));
        }
        if self.io.read_timeout_ms == 0 {
            return Err(invalid("io.read_timeout_ms", "must be greater than zero"));
        }
        let length = self.production.length_per_joint_m;
        if !length.is_finite() || length <= 0.0 {
            return Err(invalid("production.length_per_joint_m", format!("{} is not a positive length", length)));
        }
        if self.database.write_queue_capacity == 0 {
            return Err(invalid("database.write_queue_capacity", "must be greater than zero"));
        }
        if self.database.retry_base_ms == 0 || self.database.retry_max_ms < self.database.retry_base_ms {
            return Err(invalid("database.retry_max_ms", "must be at least retry_base_ms, which must be non-zero"));
        }
        if self.streaming.broadcast_interval_secs == 0 {
            return Err(invalid("streaming.broadcast_interval_secs", "must be greater than zero"));
        }
        if self.security.lockout_threshold == 0 {
            return Err(invalid("security.lockout_threshold", "must be greater than zero"));
        }
        if !self.simulate && self.io.port.is_none() {
            return Err(invalid("io.port", "required unless simulate = true"));
        }

        self.shift_clock().map(|_| ())
    }
}

/// Discrete input polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub poll_interval_ms: u64,

    /// Hold time before a sensor level is accepted
    pub debounce_ms: u64,

    /// Upper bound on a single read
    pub read_timeout_ms: u64,

    /// Delay between reconnect attempts while disconnected
    pub reconnect_interval_ms: u64,

    /// No successful read for this long reports the input as stale
    pub stale_after_secs: u64,

    /// Serial device of the RTU module, e.g. /dev/ttyUSB0
    pub port: Option<String>,
    pub baud_rate: u32,
    pub unit_id: u8,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            debounce_ms: 30,
            read_timeout_ms: 1000,
            reconnect_interval_ms: 8000,
            stale_after_secs: 5,
            port: None,
            baud_rate: 9600,
            unit_id: 1,
        }
    }
}

/// Joint counting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Metres of board added per counted joint
    pub length_per_joint_m: f64,

    /// Minimum spacing between two accepted joints
    pub min_retrigger_ms: u64,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            length_per_joint_m: 1.2,
            min_retrigger_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DowntimeConfig {
    /// Power-off shorter than this is not recorded
    pub min_downtime_secs: u64,
}

impl Default for DowntimeConfig {
    fn default() -> Self {
        Self { min_downtime_secs: 60 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OeeConfig {
    /// Daily target in metres used when none is stored for the date
    pub default_daily_target_m: Option<f64>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path, relative to `data_dir` unless absolute
    pub path: PathBuf,

    /// Bounded write queue in front of the store
    pub write_queue_capacity: usize,

    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jointline.db"),
            write_queue_capacity: 1024,
            retry_base_ms: 50,
            retry_max_ms: 2000,
            max_retries: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.io.debounce_ms, 30);
        assert_eq!(config.production.min_retrigger_ms, 2000);
        assert_eq!(config.downtime.min_downtime_secs, 60);
        assert_eq!(config.shift_clock().unwrap().operational_shift_count(), 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        config.io.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "io.poll_interval_ms", .. })));

        let mut config = Config::default();
        config.production.length_per_joint_m = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.shifts.push(ShiftWindow::new("3", 3, "Malam", 22, 8));
        assert!(matches!(config.validate(), Err(ConfigError::OverlappingShifts(_, _))));

        let mut config = Config::default();
        config.simulate = false;
        assert!(config.validate().is_err());
        config.io.port = Some("/dev/ttyUSB0".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_target_is_not_an_error() {
        let mut config = Config::default();
        config.oee.default_daily_target_m = Some(0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_create_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        created.machine_id = 4;
        created.save(&path).unwrap();
        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded.machine_id, 4);
        assert_eq!(loaded.shifts, default_shifts());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("machine_id = 2\n[io]\ndebounce_ms = 50\n").unwrap();
        assert_eq!(config.machine_id, 2);
        assert_eq!(config.io.debounce_ms, 50);
        assert_eq!(config.io.poll_interval_ms, 100);
        assert_eq!(config.shifts.len(), 2);
    }

    #[test]
    fn test_database_path_under_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/var/lib/jointline");
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/jointline/jointline.db"));
    }
}
