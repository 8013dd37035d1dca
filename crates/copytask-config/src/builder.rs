//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use copytask_types::{BufferSize, RetryPolicy};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration builder for loading configuration from multiple sources
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
}

/// Separates nested keys in environment variables: `COPYTASK__ENGINE__WORKER_COUNT`
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Defaults,
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
        }
    }

    /// Add default configuration values
    pub fn add_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Add a configuration file source; missing files are ignored
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Merge all sources, deserialize and validate
    pub fn build(mut self) -> ConfigResult<Config> {
        // Defaults always sit underneath so partial files deserialize
        self.inner = self
            .inner
            .add_source(config::Config::try_from(&Config::default())?);

        for source in &self.sources {
            match source {
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .separator(ENV_SEPARATOR)
                            .try_parsing(true),
                    );
                }
                ConfigSource::Defaults => {}
            }
        }

        let config = self.inner.build()?;
        let result: Config = config.try_deserialize()?;

        Self::validate(&result)?;

        Ok(result)
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate value ranges across all sections
    pub fn validate(config: &Config) -> ConfigResult<()> {
        let engine = &config.engine;
        if !(1..=64).contains(&engine.worker_count) {
            return Err(ConfigError::validation(
                "engine.worker_count must be between 1 and 64",
            ));
        }
        if !(50..=5000).contains(&engine.progress_interval_ms) {
            return Err(ConfigError::validation(
                "engine.progress_interval_ms must be between 50 and 5000",
            ));
        }
        if engine.space_margin_percent > 100 {
            return Err(ConfigError::validation(
                "engine.space_margin_percent must not exceed 100",
            ));
        }
        if engine.broadcast_capacity == 0 {
            return Err(ConfigError::validation(
                "engine.broadcast_capacity must be greater than 0",
            ));
        }

        RetryPolicy::new(
            config.copy.max_retries,
            Duration::from_millis(config.retry.initial_delay_ms),
            Duration::from_millis(config.retry.max_delay_ms),
            config.retry.backoff_multiplier,
        )
        .map_err(|message| ConfigError::invalid_value("retry", message))?;

        if let Some(chunk) = config.copy.chunk_size {
            Self::validate_buffer("copy.chunk_size", chunk)?;
        }
        for (class, size) in config.buffers.overrides() {
            Self::validate_buffer(&format!("buffers.{class}"), size)?;
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }

    /// Sizes arriving through serde skip the `BufferSize` constructor checks
    fn validate_buffer(key: &str, size: BufferSize) -> ConfigResult<()> {
        BufferSize::new(size.get())
            .map(|_| ())
            .map_err(|message| ConfigError::invalid_value(key, message))
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
    use copytask_types::{DeviceClass, OverwritePolicy, VerifyMode};
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().add_defaults().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_builder_yaml_file() {
        let file = yaml_file(
            r#"
engine:
  worker_count: 2
copy:
  overwrite: skip
  verify: checksum
buffers:
  usb2: 32768
devices:
  rules:
    - prefix: /media/usb
      class: usb2
"#,
        );

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();

        assert_eq!(config.engine.worker_count, 2);
        assert_eq!(config.engine.progress_interval_ms, 250);
        assert_eq!(config.copy.overwrite, OverwritePolicy::Skip);
        assert_eq!(config.copy.verify, VerifyMode::Checksum);
        assert!(config.copy.preserve_timestamps);
        assert_eq!(config.buffers.usb2.map(BufferSize::get), Some(32768));
        assert_eq!(config.devices.rules[0].class, DeviceClass::USB2);
    }

    #[test]
    fn test_builder_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nworker_count = 6\n\n[logging]\nlevel = \"debug\"").unwrap();

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build()
            .unwrap();
        assert_eq!(config.engine.worker_count, 6);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file("/definitely/not/here/copytask.yaml")
            .build()
            .unwrap();
        assert_eq!(config.engine.worker_count, 4);
    }

    #[test]
    fn test_worker_count_validation() {
        let file = yaml_file("engine:\n  worker_count: 0");
        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("engine.worker_count must be between 1 and 64"));
    }

    #[test]
    fn test_buffer_validation() {
        let file = yaml_file("buffers:\n  ssd: 5000");
        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_retry_validation() {
        let file = yaml_file("retry:\n  initial_delay_ms: 9000\n  max_delay_ms: 1000");
        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(file.path())
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("COPYTASKTEST__ENGINE__HISTORY_LIMIT", "17");
        let config = ConfigBuilder::new()
            .add_defaults()
            .add_env_prefix("COPYTASKTEST")
            .build()
            .unwrap();
        std::env::remove_var("COPYTASKTEST__ENGINE__HISTORY_LIMIT");
        assert_eq!(config.engine.history_limit, 17);
    }
}
