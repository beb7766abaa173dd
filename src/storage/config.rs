//! Engine configuration loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Motion sampling settings
    pub sampling: SamplingSettings,
    /// Energy batching settings
    pub batching: BatchSettings,
    /// Leaderboard cache settings
    pub leaderboard: LeaderboardSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sampling: SamplingSettings::default(),
            batching: BatchSettings::default(),
            leaderboard: LeaderboardSettings::default(),
        }
    }
}

/// Motion sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSettings {
    /// Accelerometer poll interval in milliseconds
    pub sample_interval_ms: u64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
        }
    }
}

/// Energy batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Flush interval in milliseconds. Deliberately much larger than the
    /// sample interval so one network write covers ~30 samples.
    pub flush_interval_ms: u64,
    /// Maximum delivery attempts per delta within one flush cycle
    pub max_flush_attempts: u32,
    /// Base backoff between retries in milliseconds (doubles per attempt)
    pub retry_backoff_ms: u64,
    /// Per-attempt network timeout in milliseconds
    pub network_timeout_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 3000,
            max_flush_attempts: 5,
            retry_backoff_ms: 250,
            network_timeout_ms: 5000,
        }
    }
}

/// Leaderboard cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSettings {
    /// Snapshot recompute interval in seconds
    pub refresh_interval_secs: u64,
    /// How many ranked entries each snapshot holds
    pub cached_top_n: usize,
    /// A snapshot older than this many refresh intervals indicates the
    /// refresh job itself has failed
    pub stale_after_intervals: u32,
}

impl Default for LeaderboardSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
            cached_top_n: 100,
            stale_after_intervals: 3,
        }
    }
}

/// Get the platform data directory for CrowdPulse.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "crowdpulse", "CrowdPulse")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the path to the config file.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from disk, falling back to defaults.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    let path = get_config_path();

    if !path.exists() {
        let mut config = EngineConfig::default();
        config.data_dir = get_data_dir();
        return Ok(config);
    }

    let content =
        std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: EngineConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.data_dir = get_data_dir();

    Ok(config)
}

/// Save configuration to disk.
pub fn save_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let path = get_config_path();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
}
