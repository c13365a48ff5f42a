//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::board::reset::ResetStrategy;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Board-control settings
    #[serde(default)]
    pub board: BoardConfig,

    /// Working directory layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Wait and timeout policy
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Pass/fail thresholds
    #[serde(default)]
    pub policy: Policy,
}

/// Board-control settings
#[derive(Debug, Deserialize, Clone)]
pub struct BoardConfig {
    /// Board-control command
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Reset strategy used when a suite does not force one
    #[serde(default)]
    pub reset: ResetStrategy,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            reset: ResetStrategy::default(),
        }
    }
}

fn default_tool() -> String {
    "ttc".to_string()
}

/// Directory layout, relative to the directory the suite is started from
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Where the kernel source is fetched to
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Parent of the per-target build output directories
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Where run logs and saved artifacts go
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            build_root: default_build_root(),
            results_dir: default_results_dir(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("test-linux")
}
fn default_build_root() -> PathBuf {
    PathBuf::from("test-build")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("test-data")
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Settle time after a reset, unless the board reports its own
    #[serde(default = "default_reset_settle")]
    pub reset_settle_secs: u64,

    /// Upper bound for waiting on a booting board
    #[serde(default = "default_boot_wait")]
    pub boot_wait_secs: u64,

    /// Interval between boot polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Time a board is left running before uptime comparisons
    #[serde(default = "default_uptime_settle")]
    pub uptime_settle_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reset_settle_secs: default_reset_settle(),
            boot_wait_secs: default_boot_wait(),
            poll_interval_secs: default_poll_interval(),
            uptime_settle_secs: default_uptime_settle(),
        }
    }
}

fn default_reset_settle() -> u64 {
    60
}
fn default_boot_wait() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    1
}
fn default_uptime_settle() -> u64 {
    40
}

impl Timeouts {
    pub fn reset_settle(&self) -> Duration {
        Duration::from_secs(self.reset_settle_secs)
    }

    pub fn boot_wait(&self) -> Duration {
        Duration::from_secs(self.boot_wait_secs)
    }

    /// Never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn uptime_settle(&self) -> Duration {
        Duration::from_secs(self.uptime_settle_secs)
    }
}

/// Pass/fail thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct Policy {
    /// Longest acceptable delay-loop calibration with a preset lpj
    #[serde(default = "default_calibration_threshold")]
    pub calibration_threshold_ms: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            calibration_threshold_ms: default_calibration_threshold(),
        }
    }
}

fn default_calibration_threshold() -> f64 {
    2.0
}

impl Policy {
    pub fn calibration_threshold_secs(&self) -> f64 {
        self.calibration_threshold_ms / 1000.0
    }
}

impl Config {
    /// Load configuration from an explicit file, or the default config file
    ///
    /// Returns default configuration if no file exists. An explicit path
    /// that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
