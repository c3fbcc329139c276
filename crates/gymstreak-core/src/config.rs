use anyhow::{Context, Result};
use chrono::{FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::week::WeekWindow;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "GYMSTREAK_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub locks: LockConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Check-ins needed for a week to qualify.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Run an audit alongside every n-th incremental update; 0 disables.
    #[serde(default)]
    pub spot_check_interval: u32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            week_start: default_week_start(),
            utc_offset_minutes: 0,
            spot_check_interval: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            max_cas_retries: default_max_cas_retries(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("threshold must be at least 1")]
    ZeroThreshold,
    #[error("utc_offset_minutes {0} is outside ±1439")]
    OffsetOutOfRange(i32),
    #[error("max_cas_retries must be at least 1")]
    ZeroRetries,
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidConfig
    }
}

impl EngineConfig {
    /// Check every field that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streak.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.locks.max_cas_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        self.week_window().map(|_| ())
    }

    /// Build the week window described by `[streak]`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OffsetOutOfRange`] for offsets of a day or more.
    pub fn week_window(&self) -> Result<WeekWindow, ConfigError> {
        let minutes = self.streak.utc_offset_minutes;
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::OffsetOutOfRange(minutes))?;
        Ok(WeekWindow::new(self.streak.week_start, offset))
    }
}

/// Load a config file. A missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content).with_context(|| {
        format!(
            "{}: Failed to parse {}",
            ErrorCode::ConfigParseError.code(),
            path.display()
        )
    })?;

    config
        .validate()
        .with_context(|| format!("{}: invalid {}", ErrorCode::InvalidConfig.code(), path.display()))?;

    Ok(config)
}

/// Default per-user config location (`<config dir>/gymstreak/config.toml`).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gymstreak/config.toml"))
}

/// Resolve and load the effective config.
///
/// Precedence: `explicit` path, then `$GYMSTREAK_CONFIG`, then the default
/// location, then built-in defaults.
///
/// # Errors
///
/// Returns an error if the chosen file exists but is invalid.
pub fn resolve_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let env_path = env::var_os(CONFIG_ENV).map(PathBuf::from);
    match resolve_config_path(explicit, env_path, default_config_path()) {
        Some(path) => load_config(&path),
        None => Ok(EngineConfig::default()),
    }
}

fn resolve_config_path(
    explicit: Option<&Path>,
    env_path: Option<PathBuf>,
    default_path: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or(env_path).or(default_path)
}

const fn default_threshold() -> u32 {
    3
}

const fn default_week_start() -> Weekday {
    Weekday::Mon
}

const fn default_lock_timeout_ms() -> u64 {
    2_000
}

const fn default_max_cas_retries() -> u32 {
    8
}
