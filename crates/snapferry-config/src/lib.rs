//! Configuration management system for snapferry
//!
//! This crate loads the backup job description: which pools to replicate,
//! where to put the backups, which filesystems take part, and a few runtime
//! tunables.
//!
//! # Features
//!
//! - **Multiple formats**: TOML (preferred), YAML and JSON configuration files
//! - **Validation**: required fields are checked before anything is planned
//! - **Environment overrides**: `SNAPFERRY_*` variables override file values
//! - **Filesystem selection**: glob include/exclude patterns via [`FilesystemFilter`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use snapferry_config::ConfigLoader;
//!
//! let config = ConfigLoader::load_from_file("snapferry.toml")
//!     .expect("Failed to load configuration");
//!
//! println!("Backing up {:?} to {}", config.sources, config.destination());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use snapferry_types::ConcurrencyLimit;

pub mod builder;
pub mod error;
pub mod filter;
pub mod loader;

pub use builder::ConfigBuilder;
pub use config::FileFormat;
pub use error::{ConfigError, ConfigResult};
pub use filter::FilesystemFilter;
pub use loader::ConfigLoader;

/// Main configuration structure for snapferry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Source pools or filesystems whose snapshots are replicated
    #[serde(default)]
    pub sources: Vec<String>,
    /// Destination root filesystem the backups live under
    #[serde(default)]
    pub destination: Option<String>,
    /// Glob patterns a filesystem must match at least one of
    #[serde(default = "default_includes")]
    pub includes: Vec<String>,
    /// Glob patterns that exclude a filesystem
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Bound on concurrently running filesystem chains, unbounded when unset
    #[serde(default)]
    pub max_concurrent_chains: Option<usize>,
    /// Storage tool locations
    #[serde(default)]
    pub zfs: ZfsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destination: None,
            includes: default_includes(),
            excludes: Vec::new(),
            max_concurrent_chains: None,
            zfs: ZfsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Check that the job is fully described
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sources.iter().all(|source| source.trim().is_empty()) {
            return Err(ConfigError::validation("please specify one or more sources"));
        }

        if self.destination.as_deref().map_or(true, |d| d.trim().is_empty()) {
            return Err(ConfigError::validation("please specify a destination"));
        }

        if self.includes.is_empty() {
            return Err(ConfigError::validation(
                "includes must contain at least one pattern",
            ));
        }

        self.concurrency_limit()?;

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }

    /// Destination root, empty when not configured
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or_default()
    }

    /// Validated bound on concurrent chains
    pub fn concurrency_limit(&self) -> ConfigResult<ConcurrencyLimit> {
        ConcurrencyLimit::from_option(self.max_concurrent_chains).map_err(|message| {
            ConfigError::invalid_value("max_concurrent_chains".to_string(), message)
        })
    }

    /// Compile the include/exclude patterns
    pub fn filter(&self) -> ConfigResult<FilesystemFilter> {
        FilesystemFilter::new(&self.includes, &self.excludes)
    }
}

/// Locations of the storage tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZfsConfig {
    /// `zfs` binary
    #[serde(default = "default_zfs_binary")]
    pub zfs_binary: String,
    /// `zpool` binary
    #[serde(default = "default_zpool_binary")]
    pub zpool_binary: String,
}

impl Default for ZfsConfig {
    fn default() -> Self {
        Self {
            zfs_binary: default_zfs_binary(),
            zpool_binary: default_zpool_binary(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_includes() -> Vec<String> {
    vec!["**".to_string()]
}

fn default_zfs_binary() -> String {
    "zfs".to_string()
}

fn default_zpool_binary() -> String {
    "zpool".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
