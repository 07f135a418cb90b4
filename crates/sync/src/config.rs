// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty or missing
//! file is valid:
//!
//! ```toml
//! data_dir = "/home/me/.local/share/mnemo"
//!
//! [sync]
//! stale_after_days = 7
//!
//! [realtime]
//! base_delay_ms = 5000
//! max_attempts = 5
//!
//! [cache]
//! memory_ttl_secs = 300
//! persisted_ttl_secs = 86400
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::engine::EngineConfig;
use crate::scheduler::Backoff;

const APP_DIR_NAME: &str = "mnemo";
const DB_FILE_NAME: &str = "mnemo.db";
const LOG_FILE_NAME: &str = "sync.log";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the database and log. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub sync: SyncConfig,
    pub realtime: RealtimeConfig,
    pub cache: CacheTtlConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failing queued operations older than this many days are dropped.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u64,
}

fn default_stale_after_days() -> u64 {
    7
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            stale_after_days: default_stale_after_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Delay before the first reconnect; doubled on every further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Reconnect attempts before the error is surfaced.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
    #[serde(default = "default_persisted_ttl_secs")]
    pub persisted_ttl_secs: u64,
}

fn default_memory_ttl_secs() -> u64 {
    300
}

fn default_persisted_ttl_secs() -> u64 {
    86400
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        CacheTtlConfig {
            memory_ttl_secs: default_memory_ttl_secs(),
            persisted_ttl_secs: default_persisted_ttl_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    /// Parses and validates TOML content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.stale_after_days == 0 {
            return Err(ConfigError::Invalid("sync.stale_after_days must be at least 1".into()));
        }
        if self.realtime.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("realtime.base_delay_ms must be positive".into()));
        }
        if self.realtime.max_attempts == 0 {
            return Err(ConfigError::Invalid("realtime.max_attempts must be at least 1".into()));
        }
        if self.cache.memory_ttl_secs == 0 || self.cache.persisted_ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache TTLs must be positive".into()));
        }
        Ok(())
    }

    /// Directory for the database and log file.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|d| d.join(APP_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(".").join(format!(".{APP_DIR_NAME}"))),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(DB_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join(LOG_FILE_NAME)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            stale_after: Duration::from_secs(
                self.sync.stale_after_days.saturating_mul(24 * 60 * 60),
            ),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base_delay: Duration::from_millis(self.realtime.base_delay_ms),
            max_attempts: self.realtime.max_attempts,
        }
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            memory_ttl: Duration::from_secs(self.cache.memory_ttl_secs),
            persisted_ttl: Duration::from_secs(self.cache.persisted_ttl_secs),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
