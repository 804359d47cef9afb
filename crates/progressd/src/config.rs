//! Configuration management for progressd.
//!
//! Loads settings from `$PROGRESSD_CONFIG`, /etc/progressd/config.toml or
//! /var/lib/progressd/config.toml, falling back to defaults.

use anyhow::Result;
use progress_shared::activity::OffPeakWindow;
use progress_shared::challenges::BoardSizes;
use progress_shared::leveling::BonusPolicy;
use progress_shared::levels::LevelTable;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PROGRESSD_CONFIG";

/// Config file path
pub const CONFIG_PATH: &str = "/etc/progressd/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/progressd/config.toml";

/// Database file name inside `data_dir`
pub const DB_FILE: &str = "progress.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> String {
    progress_shared::DEFAULT_LISTEN_ADDR.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(progress_shared::STATE_DIR)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Award pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardsConfig {
    /// Identical awards inside this window are suppressed
    #[serde(default = "default_dedup_cooldown_ms")]
    pub dedup_cooldown_ms: i64,

    #[serde(default = "default_level_up_bonus_xp")]
    pub level_up_bonus_xp: i64,

    /// Added per level above 1 (0 = flat bonus)
    #[serde(default)]
    pub level_up_bonus_per_level: i64,

    /// Daily streak bonus; 0 disables it
    #[serde(default = "default_streak_bonus_xp")]
    pub streak_bonus_xp: i64,

    #[serde(default = "default_true")]
    pub off_peak_enabled: bool,

    #[serde(default = "default_off_peak_start_hour")]
    pub off_peak_start_hour: u32,

    #[serde(default = "default_off_peak_end_hour")]
    pub off_peak_end_hour: u32,

    #[serde(default = "default_off_peak_bonus_xp")]
    pub off_peak_bonus_xp: i64,
}

fn default_dedup_cooldown_ms() -> i64 {
    progress_shared::DEFAULT_COOLDOWN_MS
}

fn default_level_up_bonus_xp() -> i64 {
    25
}

fn default_streak_bonus_xp() -> i64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_off_peak_start_hour() -> u32 {
    22
}

fn default_off_peak_end_hour() -> u32 {
    6
}

fn default_off_peak_bonus_xp() -> i64 {
    5
}

impl Default for AwardsConfig {
    fn default() -> Self {
        Self {
            dedup_cooldown_ms: default_dedup_cooldown_ms(),
            level_up_bonus_xp: default_level_up_bonus_xp(),
            level_up_bonus_per_level: 0,
            streak_bonus_xp: default_streak_bonus_xp(),
            off_peak_enabled: true,
            off_peak_start_hour: default_off_peak_start_hour(),
            off_peak_end_hour: default_off_peak_end_hour(),
            off_peak_bonus_xp: default_off_peak_bonus_xp(),
        }
    }
}

impl AwardsConfig {
    pub fn bonus_policy(&self) -> BonusPolicy {
        BonusPolicy {
            base_xp: self.level_up_bonus_xp,
            per_level_xp: self.level_up_bonus_per_level,
        }
    }

    /// Off-peak window and bonus, if enabled
    pub fn off_peak(&self) -> Option<(OffPeakWindow, i64)> {
        if !self.off_peak_enabled || self.off_peak_bonus_xp <= 0 {
            return None;
        }
        Some((
            OffPeakWindow {
                start_hour: self.off_peak_start_hour % 24,
                end_hour: self.off_peak_end_hour % 24,
            },
            self.off_peak_bonus_xp,
        ))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// TOML level table; the built-in table is used when unset
    #[serde(default)]
    pub table_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengesConfig {
    #[serde(default = "default_daily_count")]
    pub daily_count: usize,

    #[serde(default = "default_weekly_count")]
    pub weekly_count: usize,

    #[serde(default = "default_seasonal_count")]
    pub seasonal_count: usize,
}

fn default_daily_count() -> usize {
    3
}

fn default_weekly_count() -> usize {
    2
}

fn default_seasonal_count() -> usize {
    1
}

impl Default for ChallengesConfig {
    fn default() -> Self {
        Self {
            daily_count: default_daily_count(),
            weekly_count: default_weekly_count(),
            seasonal_count: default_seasonal_count(),
        }
    }
}

impl ChallengesConfig {
    pub fn board_sizes(&self) -> BoardSizes {
        BoardSizes {
            daily: self.daily_count,
            weekly: self.weekly_count,
            seasonal: self.seasonal_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    None,
    /// In-process authoritative store (demos, tests)
    Memory,
    Http,
}

/// Remote reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub remote: RemoteKind,

    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per remote call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote: RemoteKind::None,
            remote_url: None,
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl SyncConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.remote != RemoteKind::None
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            2.0,
            0.1,
            self.max_attempts.max(1),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub awards: AwardsConfig,

    #[serde(default)]
    pub levels: LevelsConfig,

    #[serde(default)]
    pub challenges: ChallengesConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Load config from file or use defaults
    pub fn load() -> Self {
        let explicit = std::env::var(CONFIG_ENV).ok();
        let candidates = explicit
            .iter()
            .map(String::as_str)
            .chain([CONFIG_PATH, DEFAULT_CONFIG_PATH]);

        let mut last_error = None;
        for path in candidates {
            match Self::load_from_path(path) {
                Ok(config) => return config,
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(e) = last_error {
            warn!("Config not found, using defaults: {}", e);
        }
        Config::default()
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Level table from `levels.table_path`, or the built-in one
    pub fn level_table(&self) -> Result<LevelTable> {
        match &self.levels.table_path {
            Some(path) => {
                let table = LevelTable::load(path)?;
                info!(
                    "Loaded {} levels from {}",
                    table.levels().len(),
                    path.display()
                );
                Ok(table)
            }
            None => Ok(LevelTable::standard()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.daemon.data_dir.join(DB_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.listen_addr, "127.0.0.1:7870");
        assert_eq!(config.awards.dedup_cooldown_ms, 2_000);
        assert_eq!(config.awards.level_up_bonus_xp, 25);
        assert_eq!(config.challenges.board_sizes(), BoardSizes::default());
        assert!(!config.sync.is_active());
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/progressd/progress.db"));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[awards]
dedup_cooldown_ms = 500
level_up_bonus_xp = 40

[sync]
enabled = true
remote = "http"
remote_url = "https://progress.example.com"
max_attempts = 3
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.awards.dedup_cooldown_ms, 500);
        assert_eq!(config.awards.bonus_policy().base_xp, 40);
        // Defaults for missing fields
        assert_eq!(config.awards.streak_bonus_xp, 5);
        assert!(config.sync.is_active());
        assert_eq!(config.sync.remote, RemoteKind::Http);
        assert_eq!(config.sync.retry_policy().max_attempts, 3);
        assert_eq!(config.sync.timeout_secs, 10);
    }

    #[test]
    fn test_off_peak_disabled() {
        let mut awards = AwardsConfig::default();
        assert!(awards.off_peak().is_some());
        awards.off_peak_enabled = false;
        assert!(awards.off_peak().is_none());
    }

    #[test]
    fn test_missing_level_table_errors() {
        let mut config = Config::default();
        config.levels.table_path = Some(PathBuf::from("/nonexistent/levels.toml"));
        assert!(config.level_table().is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[daemon]\nlisten_addr = \"0.0.0.0:9000\"\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.daemon.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.daemon.log_level, "info");
    }
}
