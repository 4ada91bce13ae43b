//! Monitor configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a
//! valid configuration.

use drive_traits::MonitorError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Log less often and request fewer location updates.
    #[serde(default)]
    pub power_saver: bool,

    /// Request location updates and write positions to the trip file.
    #[serde(default = "default_log_gps")]
    pub log_gps: bool,

    /// Directory that receives trip files.
    #[serde(default = "default_trip_dir")]
    pub trip_dir: PathBuf,

    /// Wait before calibration starts listening, so the vibration of the
    /// user's touch has died down (ms).
    #[serde(default = "default_calibration_settle_ms")]
    pub calibration_settle_ms: u64,
}

fn default_log_gps() -> bool {
    true
}

fn default_trip_dir() -> PathBuf {
    PathBuf::from("trips")
}

fn default_calibration_settle_ms() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            power_saver: false,
            log_gps: default_log_gps(),
            trip_dir: default_trip_dir(),
            calibration_settle_ms: default_calibration_settle_ms(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MonitorError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, MonitorError> {
        Ok(toml::from_str(contents)?)
    }

    /// Time between two trip file records.
    pub fn trip_interval(&self) -> Duration {
        crate::trip_logger::TripLogger::interval_for(self.power_saver)
    }

    /// Minimum time between two location updates.
    pub fn location_interval(&self) -> Duration {
        Duration::from_millis(if self.power_saver { 6000 } else { 1000 })
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }
}
