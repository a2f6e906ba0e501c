//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Configuration builder for loading configuration from multiple sources
///
/// Sources are layered in the order they are added: defaults first, then
/// files, then environment variables.
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    validate: bool,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Inline { content: String, format: FileFormat },
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            validate: true,
        }
    }

    /// Add a configuration file source
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add configuration text in the given format
    pub fn add_source_str<S: Into<String>>(mut self, content: S, format: FileFormat) -> Self {
        self.sources.push(ConfigSource::Inline {
            content: content.into(),
            format,
        });
        self
    }

    /// Add environment variable source with prefix
    ///
    /// Nested keys are separated by a double underscore, as in
    /// `SNAPFERRY_LOGGING__LEVEL`.
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Skip validation of required fields
    ///
    /// Used when the caller overrides fields after loading and validates later.
    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Build the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        let defaults_value = serde_yaml::to_value(Config::default())
            .map_err(|e| ConfigError::other(format!("Failed to serialize defaults: {}", e)))?;
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&defaults_value)?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if !path.exists() {
                        return Err(ConfigError::Io {
                            path: path.clone(),
                            source: std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                "Configuration file not found",
                            ),
                        });
                    }
                    self.inner = self
                        .inner
                        .add_source(File::from(path.clone()).format(*format));
                }
                ConfigSource::Inline { content, format } => {
                    self.inner = self
                        .inner
                        .add_source(File::from_str(content, *format));
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .prefix_separator("_")
                            .separator("__"),
                    );
                }
            }
        }

        let config = self.inner.build()?;
        let result: Config = config.try_deserialize()?;

        if self.validate {
            result.validate()?;
        }

        Ok(result)
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_toml_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
sources = ["tank", "rpool"]
destination = "backup/hosts/alpha"
excludes = ["tank/scratch"]
max_concurrent_chains = 4
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.sources, vec!["tank", "rpool"]);
        assert_eq!(config.destination(), "backup/hosts/alpha");
        assert_eq!(config.includes, vec!["**"]);
        assert_eq!(config.excludes, vec!["tank/scratch"]);
        assert_eq!(config.max_concurrent_chains, Some(4));
    }

    #[test]
    fn test_builder_yaml_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
sources: [tank]
destination: backup/tank
includes: ["tank/home/**"]
logging:
  level: debug
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.includes, vec!["tank/home/**"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.zfs.zpool_binary, "zpool");
    }

    #[test]
    fn test_builder_validation() {
        let result = ConfigBuilder::new()
            .add_source_str("destination = \"backup\"", FileFormat::Toml)
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("please specify one or more sources"));
    }

    #[test]
    fn test_builder_skip_validation() {
        let config = ConfigBuilder::new()
            .add_source_str("sources = [\"tank\"]", FileFormat::Toml)
            .skip_validation()
            .build()
            .unwrap();
        assert!(config.destination.is_none());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(temp_file, "sources = [\"tank\"\ndestination = ").unwrap();

        let result = ConfigBuilder::new().add_source_file(temp_file.path()).build();
        match result {
            Err(ConfigError::Parse { path, .. }) => {
                assert!(path.ends_with(temp_file.path().file_name().unwrap()));
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigBuilder::new()
            .add_source_file("/nonexistent/snapferry.toml")
            .build();
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
