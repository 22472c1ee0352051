//! golden-repos configuration management.
//!
//! Handles the configuration file at:
//! - Linux: ~/.config/golden-repos/config.toml
//! - macOS: ~/Library/Application Support/golden-repos/config.toml
//! - Windows: %APPDATA%\golden-repos\config.toml
//!
//! A missing file yields the defaults. The refresh interval is read through
//! [`RefreshIntervalSource`] on every tick, so the scheduler never caches it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GoldenRepoError, Result};
use crate::fs_utils;
use crate::indexer::IndexType;
use crate::probe::ProbeKind;

/// Supplies the scheduled refresh interval
pub trait RefreshIntervalSource: Send + Sync {
    fn global_refresh_interval(&self) -> Duration;
}

/// Constant interval, mostly for tests and embedded use
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl RefreshIntervalSource for FixedInterval {
    fn global_refresh_interval(&self) -> Duration {
        self.0
    }
}

/// golden-repos configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenReposConfig {
    /// Root for alias/registry documents, snapshots and default master clones
    #[serde(default = "fs_utils::default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GoldenReposConfig {
    fn default() -> Self {
        Self {
            data_dir: fs_utils::default_data_dir(),
            refresh: RefreshConfig::default(),
            indexing: IndexingConfig::default(),
            snapshot: SnapshotConfig::default(),
            reconcile: ReconcileConfig::default(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Refresh scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between scheduled refresh cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Bounded wait for an alias's write lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// How long a superseded snapshot stays on disk after the swap
    #[serde(default = "default_snapshot_grace_secs")]
    pub snapshot_grace_secs: u64,
    /// Upstream branch to follow (default: whatever origin fetches)
    #[serde(default)]
    pub branch: Option<String>,
}

/// Upper bound for `refresh.interval_secs` (30 days)
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 3600;
/// Upper bound for `refresh.lock_timeout_secs` (1 day)
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 24 * 3600;

fn default_interval_secs() -> u64 {
    3600
}
fn default_lock_timeout_secs() -> u64 {
    30
}
fn default_snapshot_grace_secs() -> u64 {
    300
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            snapshot_grace_secs: default_snapshot_grace_secs(),
            branch: None,
        }
    }
}

/// Index types built on refresh and how to build them
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexingConfig {
    #[serde(default)]
    pub enabled: Vec<IndexType>,
    /// Index type name -> argv, `{path}` replaced with the directory
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,
}

impl IndexingConfig {
    /// Commands keyed by parsed index type
    pub fn index_commands(&self) -> Result<BTreeMap<IndexType, Vec<String>>> {
        self.commands
            .iter()
            .map(|(name, argv)| Ok((name.parse::<IndexType>()?, argv.clone())))
            .collect()
    }
}

/// Clone primitive used for snapshots and restores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneKind {
    #[default]
    Reflink,
    Copy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub clone: CloneKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconcileConfig {
    /// How to decide whether a master clone is usable
    #[serde(default)]
    pub probe: ProbeKind,
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_threads() -> usize {
    4
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GoldenReposConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("golden-repos")
            .join("config.toml")
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| GoldenRepoError::io(path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| GoldenRepoError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GoldenRepoError::io(parent, e))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| GoldenRepoError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content).map_err(|e| GoldenRepoError::io(&temp_path, e))?;
        fs_utils::atomic_rename(&temp_path, path).map_err(|e| GoldenRepoError::io(path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(GoldenRepoError::Config { message });

        if self.refresh.interval_secs == 0 {
            return invalid("refresh.interval_secs must be >= 1".to_string());
        }
        if self.refresh.interval_secs > MAX_INTERVAL_SECS {
            return invalid(format!(
                "refresh.interval_secs must be <= {}",
                MAX_INTERVAL_SECS
            ));
        }
        if self.refresh.lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            return invalid(format!(
                "refresh.lock_timeout_secs must be <= {}",
                MAX_LOCK_TIMEOUT_SECS
            ));
        }
        if self.workers.threads == 0 {
            return invalid("workers.threads must be >= 1".to_string());
        }
        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "Invalid log level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ));
        }

        let commands = self.indexing.index_commands()?;
        for index_type in &self.indexing.enabled {
            match commands.get(index_type) {
                Some(argv) if !argv.is_empty() => {}
                _ => {
                    return invalid(format!(
                        "indexing.enabled contains '{}' but indexing.commands.{} is not set",
                        index_type, index_type
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn aliases_dir(&self) -> PathBuf {
        self.data_dir.join("aliases")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("registry")
    }

    pub fn versioned_dir(&self) -> PathBuf {
        self.data_dir.join("versioned")
    }

    /// Default parent for master clones registered without an explicit path
    pub fn masters_dir(&self) -> PathBuf {
        self.data_dir.join("masters")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.lock_timeout_secs)
    }

    pub fn snapshot_grace(&self) -> Duration {
        Duration::from_secs(self.refresh.snapshot_grace_secs)
    }
}

impl RefreshIntervalSource for GoldenReposConfig {
    fn global_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs.max(1))
    }
}
