//! Engine configuration
//!
//! [`EngineConfig`] is what a host process loads at startup: the connection string, the retry
//! policy, operation budgets and logging. Files may be TOML, YAML or JSON; environment variables
//! with the `REPLKEEPER` prefix override file settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{DEFAULT_READINESS_GATE_OBSERVATIONS, OperationTimeouts};
use crate::logging::LoggingConfig;

/// Environment prefix read by [`EngineConfig::from_file`]
pub const ENV_PREFIX: &str = "REPLKEEPER";

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `mongodb://` connection string
    pub connection_string: String,
    /// Attempts per operation; 0 selects the engine default
    pub retry_attempts: u32,
    /// Initial backoff delay in seconds; 0 selects the engine default
    pub retry_delay_secs: u64,
    /// Budget in minutes for operation kinds without their own timeout
    pub default_timeout_mins: u64,
    /// Budget in minutes for create
    pub create_timeout_mins: Option<u64>,
    /// Budget in minutes for read and import
    pub read_timeout_mins: Option<u64>,
    /// Budget in minutes for update
    pub update_timeout_mins: Option<u64>,
    /// Budget in minutes for delete
    pub delete_timeout_mins: Option<u64>,
    /// Seconds between readiness probes
    pub poll_interval_secs: u64,
    /// Seconds allowed for opening and probing a link
    pub connect_timeout_secs: u64,
    /// Readiness checks made by update before refusing to reconfigure
    pub readiness_gate_observations: u32,
    /// Logging
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            retry_attempts: 0,
            retry_delay_secs: 0,
            default_timeout_mins: 15,
            create_timeout_mins: None,
            read_timeout_mins: None,
            update_timeout_mins: None,
            delete_timeout_mins: None,
            poll_interval_secs: 5,
            connect_timeout_secs: 10,
            readiness_gate_observations: DEFAULT_READINESS_GATE_OBSERVATIONS,
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension. Environment variables with the
    /// `REPLKEEPER` prefix override file settings, using `__` between nested keys. The result is
    /// validated.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use replkeeper::EngineConfig;
    ///
    /// let config = EngineConfig::from_file("replkeeper.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with custom environment prefix
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject unusable values. Zero retry attempts or delay are accepted and select the
    /// engine defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "connection_string must not be empty".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_mins == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_mins must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-kind budgets, falling back to the default timeout. Budgets saturate rather than
    /// overflow; a saturated budget runs without deadline.
    pub fn operation_timeouts(&self) -> OperationTimeouts {
        let minutes = |value: Option<u64>| {
            Duration::from_secs(value.unwrap_or(self.default_timeout_mins).saturating_mul(60))
        };
        OperationTimeouts {
            create: minutes(self.create_timeout_mins),
            read: minutes(self.read_timeout_mins),
            update: minutes(self.update_timeout_mins),
            delete: minutes(self.delete_timeout_mins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogOutput;
    use std::io::Write;

    fn write_config(extension: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{extension}"))
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let file = write_config(
            "toml",
            r#"
connection_string = "mongodb://db0:27017/?replicaSet=rs0"
retry_attempts = 5
update_timeout_mins = 30

[logging]
level = "debug"
"#,
        );

        let config = EngineConfig::from_file_with_prefix(file.path(), "REPLKEEPER_TEST_TOML").unwrap();
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay_secs, 0);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.output, LogOutput::Stderr);

        let timeouts = config.operation_timeouts();
        assert_eq!(timeouts.update, Duration::from_secs(30 * 60));
        assert_eq!(timeouts.create, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_load_json() {
        let file = write_config(
            "json",
            r#"{"connection_string": "mongodb://db0:27017", "poll_interval_secs": 2}"#,
        );
        let config = EngineConfig::from_file_with_prefix(file.path(), "REPLKEEPER_TEST_JSON").unwrap();
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/replkeeper.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = write_config("ini", "connection_string = x");
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));

        let file = write_config("toml", "retry_attempts = 2");
        assert!(matches!(
            EngineConfig::from_file_with_prefix(file.path(), "REPLKEEPER_TEST_EMPTY"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_poll_interval() {
        let config = EngineConfig {
            connection_string: "mongodb://db0:27017".into(),
            poll_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_budgets_saturate() {
        let config = EngineConfig {
            connection_string: "mongodb://db0:27017".into(),
            default_timeout_mins: u64::MAX / 30,
            read_timeout_mins: Some(u64::MAX),
            connect_timeout_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());

        let timeouts = config.operation_timeouts();
        assert_eq!(timeouts.create, Duration::from_secs(u64::MAX));
        assert_eq!(timeouts.read, Duration::from_secs(u64::MAX));
    }
}
