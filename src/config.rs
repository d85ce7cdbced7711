//! Engine configuration
//!
//! Defaults come from the platform data directory and the CPU count. Each
//! setting can be overridden from the environment; a `.env` file is loaded
//! first when present.

use crate::controller::ControllerOptions;
use crate::execution::{ConflictPolicy, ExecutionOptions, TrashStrategy};
use crate::wal::WALManager;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_WAL_DIR: &str = "SENTINEL_WAL_DIR";
pub const ENV_MAX_WORKERS: &str = "SENTINEL_MAX_WORKERS";
pub const ENV_CONFLICT_POLICY: &str = "SENTINEL_CONFLICT_POLICY";
pub const ENV_QUARANTINE_DIR: &str = "SENTINEL_QUARANTINE_DIR";
pub const ENV_AUTO_ROLLBACK: &str = "SENTINEL_AUTO_ROLLBACK";
pub const ENV_ARCHIVE_ON_COMPLETE: &str = "SENTINEL_ARCHIVE_ON_COMPLETE";
pub const ENV_CLEANUP_EMPTY_DIRS: &str = "SENTINEL_CLEANUP_EMPTY_DIRS";
pub const ENV_SHOW_HIDDEN: &str = "SENTINEL_SHOW_HIDDEN";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for String {
    fn from(err: ConfigError) -> Self {
        err.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub wal_dir: PathBuf,
    pub max_workers: usize,
    pub conflict_policy: ConflictPolicy,
    pub trash_strategy: TrashStrategy,
    pub archive_on_complete: bool,
    pub cleanup_empty_dirs: bool,
    pub auto_rollback: bool,
    pub show_hidden: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_dir: WALManager::default_wal_dir(),
            max_workers: num_cpus::get().max(1),
            conflict_policy: ConflictPolicy::default(),
            trash_strategy: TrashStrategy::default(),
            archive_on_complete: true,
            cleanup_empty_dirs: false,
            auto_rollback: false,
            show_hidden: false,
        }
    }
}

impl EngineConfig {
    /// Load `.env` (current directory, then parent) and read overrides
    /// from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_WAL_DIR) {
            config.wal_dir = PathBuf::from(dir);
        }
        if let Some(value) = get(ENV_MAX_WORKERS) {
            config.max_workers = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                Ok(_) => return Err(invalid(ENV_MAX_WORKERS, value, "must be at least 1")),
                Err(e) => return Err(invalid(ENV_MAX_WORKERS, value, e)),
            };
        }
        if let Some(value) = get(ENV_CONFLICT_POLICY) {
            config.conflict_policy = value
                .parse()
                .map_err(|e: String| invalid(ENV_CONFLICT_POLICY, value, e))?;
        }
        if let Some(dir) = get(ENV_QUARANTINE_DIR) {
            config.trash_strategy = TrashStrategy::Quarantine(PathBuf::from(dir));
        }
        if let Some(value) = get(ENV_AUTO_ROLLBACK) {
            config.auto_rollback = parse_flag(ENV_AUTO_ROLLBACK, value)?;
        }
        if let Some(value) = get(ENV_ARCHIVE_ON_COMPLETE) {
            config.archive_on_complete = parse_flag(ENV_ARCHIVE_ON_COMPLETE, value)?;
        }
        if let Some(value) = get(ENV_CLEANUP_EMPTY_DIRS) {
            config.cleanup_empty_dirs = parse_flag(ENV_CLEANUP_EMPTY_DIRS, value)?;
        }
        if let Some(value) = get(ENV_SHOW_HIDDEN) {
            config.show_hidden = parse_flag(ENV_SHOW_HIDDEN, value)?;
        }

        tracing::debug!(
            wal_dir = %config.wal_dir.display(),
            max_workers = config.max_workers,
            conflict_policy = ?config.conflict_policy,
            auto_rollback = config.auto_rollback,
            "Loaded engine config"
        );

        Ok(config)
    }

    pub fn wal_manager(&self) -> WALManager {
        WALManager::with_dir(self.wal_dir.clone())
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_workers: self.max_workers,
            conflict_policy: self.conflict_policy,
            trash_strategy: self.trash_strategy.clone(),
            archive_on_complete: self.archive_on_complete,
            cleanup_empty_dirs: self.cleanup_empty_dirs,
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            show_hidden: self.show_hidden,
            auto_rollback: self.auto_rollback,
        }
    }
}

fn invalid(key: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value,
        reason: reason.to_string(),
    }
}

fn parse_flag(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}
