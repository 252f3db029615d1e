//! # Configuration
//!
//! File and environment configuration for a repokit database.
//!
//! ## Configuration Sources (in priority order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Loading                                │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     REPOKIT_DB_PATH, REPOKIT_MAX_CONNECTIONS,                          │
//! │     REPOKIT_BATCH_SIZE, REPOKIT_MAX_PARALLEL_BATCHES                   │
//! │                                                                         │
//! │  2. Config File                                                        │
//! │     repokit.toml (path chosen by the caller)                           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Compiled into the binary                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use repokit_core::RepositoryOptions;

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// The `[database]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    /// Default: "repokit.db"
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Default: 5
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Default: 1
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Wait for a free pooled connection.
    /// Default: 30
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Wait for another connection's write lock.
    /// Default: 5000
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Default: 600
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Apply embedded migrations on connect.
    /// Default: true
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_path() -> PathBuf {
    PathBuf::from("repokit.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_run_migrations() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete repokit configuration.
///
/// ## Example Config File
/// ```toml
/// [database]
/// path = "./data/repokit.db"
/// max_connections = 8
///
/// [repository]
/// batch_size = 250
/// max_parallel_batches = 4
/// page_size = 100
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepokitConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub repository: RepositoryOptions,
}

impl RepokitConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file, if given and present
    /// 3. Environment variables
    pub fn load(config_path: Option<&Path>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                info!(?path, "Loading repokit config from file");
                let contents = std::fs::read_to_string(path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::InvalidConfig(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        self.repository
            .validate()
            .map_err(|e| DbError::InvalidConfig(e.to_string()))
    }

    /// Applies `REPOKIT_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("REPOKIT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("REPOKIT_MAX_CONNECTIONS") {
            match raw.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid REPOKIT_MAX_CONNECTIONS"),
            }
        }

        if let Some(raw) = lookup("REPOKIT_BATCH_SIZE") {
            match raw.parse::<usize>() {
                Ok(n) => self.repository.batch_size = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid REPOKIT_BATCH_SIZE"),
            }
        }

        if let Some(raw) = lookup("REPOKIT_MAX_PARALLEL_BATCHES") {
            match raw.parse::<usize>() {
                Ok(n) => self.repository.max_parallel_batches = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid REPOKIT_MAX_PARALLEL_BATCHES"),
            }
        }
    }

    /// Pool settings for [`Database::new`](crate::Database::new).
    pub fn db_config(&self) -> DbConfig {
        let db = &self.database;
        DbConfig::new(db.path.clone())
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
            .busy_timeout(Duration::from_millis(db.busy_timeout_ms))
            .idle_timeout(Duration::from_secs(db.idle_timeout_secs))
            .run_migrations(db.run_migrations)
    }

    /// Options for repositories created from this configuration.
    pub fn repository_options(&self) -> RepositoryOptions {
        self.repository.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RepokitConfig::default();
        assert_eq!(config.database.path, PathBuf::from("repokit.db"));
        assert_eq!(config.repository.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RepokitConfig::from_toml(
            r#"
            [database]
            path = "/var/lib/app/data.db"

            [repository]
            batch_size = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/var/lib/app/data.db"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.repository.batch_size, 250);
        assert_eq!(config.repository.max_parallel_batches, 4);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("REPOKIT_DB_PATH", "/tmp/override.db"),
            ("REPOKIT_BATCH_SIZE", "10"),
            ("REPOKIT_MAX_CONNECTIONS", "lots"),
        ]
        .into_iter()
        .collect();

        let mut config = RepokitConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.repository.batch_size, 10);
        // Unparseable values are ignored
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_validation() {
        let mut config = RepokitConfig::default();
        config.repository.batch_size = 0;
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));

        let mut config = RepokitConfig::default();
        config.database.min_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repokit.toml");
        std::fs::write(&path, "[repository]\npage_size = 50\n").unwrap();

        let config = RepokitConfig::load(Some(&path)).unwrap();
        assert_eq!(config.repository.page_size, 50);

        let db = config.db_config();
        assert_eq!(db.max_connections, config.database.max_connections);
        assert_eq!(db.busy_timeout, Duration::from_millis(5000));
    }
}
