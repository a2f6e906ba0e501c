//! Configuration loader utilities

use crate::{Config, ConfigBuilder, ConfigResult};
use std::path::Path;

/// Environment variable prefix for overrides, e.g. `SNAPFERRY_DESTINATION`
pub const ENV_PREFIX: &str = "SNAPFERRY";

/// Configuration loader with common loading patterns
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        ConfigBuilder::new()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Load configuration from a file without validating required fields
    pub fn load_unvalidated<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        ConfigBuilder::new()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .skip_validation()
            .build()
    }

    /// Validate a configuration file
    pub fn validate_file<P: AsRef<Path>>(path: P) -> ConfigResult<()> {
        let _config = Self::load_from_file(path)?;
        Ok(())
    }
}
