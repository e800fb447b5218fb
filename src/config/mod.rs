//! Configuration management for pghealth

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::check::{
    SchemaContext, DEFAULT_BLOAT_PERCENTAGE_THRESHOLD, DEFAULT_REMAINING_PERCENTAGE_THRESHOLD,
    DEFAULT_SCHEMA_NAME,
};
use crate::connection::{url, ConnectionCredentials};
use crate::diagnostic::Diagnostic;
use crate::error::HealthResult;

pub use crate::error::ConfigError;

/// Main pghealth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster connection configuration
    pub cluster: ClusterConfig,
    /// Rule selection and thresholds
    #[serde(default)]
    pub checks: ChecksConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster connection configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Multi-host connection strings
    pub urls: Vec<String>,
    pub user: String,
    pub password: String,
    /// Interval between two primary refresh cycles in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub primary_refresh_interval_ms: u64,
    /// Upper bound for a single primary probe in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Rule selection and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_bloat_threshold")]
    pub bloat_percentage_threshold: i32,
    #[serde(default = "default_remaining_threshold")]
    pub remaining_percentage_threshold: f64,
    /// Directory holding one `<rule>.sql` file per rule
    #[serde(default = "default_sql_dir")]
    pub sql_dir: PathBuf,
    /// Rules to run; empty means all
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_schema() -> String {
    DEFAULT_SCHEMA_NAME.to_string()
}

fn default_bloat_threshold() -> i32 {
    DEFAULT_BLOAT_PERCENTAGE_THRESHOLD
}

fn default_remaining_threshold() -> f64 {
    DEFAULT_REMAINING_PERCENTAGE_THRESHOLD
}

fn default_sql_dir() -> PathBuf {
    PathBuf::from("sql")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig {
                urls: vec!["jdbc:postgresql://localhost:5432/postgres".to_string()],
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                primary_refresh_interval_ms: default_refresh_interval_ms(),
                probe_timeout_ms: default_probe_timeout_ms(),
            },
            checks: ChecksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            bloat_percentage_threshold: default_bloat_threshold(),
            remaining_percentage_threshold: default_remaining_threshold(),
            sql_dir: default_sql_dir(),
            diagnostics: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("urls", &self.urls)
            .field("user", &self.user)
            .field("password", &"******")
            .field("primary_refresh_interval_ms", &self.primary_refresh_interval_ms)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .finish()
    }
}

impl ClusterConfig {
    pub fn primary_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.primary_refresh_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn credentials(&self) -> HealthResult<ConnectionCredentials> {
        ConnectionCredentials::new(self.urls.iter().cloned(), &self.user, &self.password)
    }
}

impl ChecksConfig {
    pub fn schema_context(&self) -> HealthResult<SchemaContext> {
        SchemaContext::new(
            &self.schema,
            self.bloat_percentage_threshold,
            self.remaining_percentage_threshold,
        )
    }

    /// Configured rules, or every rule when none are listed
    pub fn enabled_diagnostics(&self) -> Vec<Diagnostic> {
        if self.diagnostics.is_empty() {
            Diagnostic::all().collect()
        } else {
            self.diagnostics.clone()
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate cluster config
        if self.cluster.urls.is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster urls cannot be empty".to_string(),
            ));
        }

        for pg_url in &self.cluster.urls {
            url::extract_host_names(pg_url).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid cluster url {}: {}", pg_url, e))
            })?;
        }

        if self.cluster.user.trim().is_empty() || self.cluster.password.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "cluster user and password cannot be blank".to_string(),
            ));
        }

        if self.cluster.probe_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "probe_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.cluster.probe_timeout_ms >= self.cluster.primary_refresh_interval_ms {
            return Err(ConfigError::ValidationError(
                "probe_timeout_ms must be less than primary_refresh_interval_ms".to_string(),
            ));
        }

        // Validate checks config
        self.checks
            .schema_context()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            cluster: ClusterConfig {
                urls: vec![
                    "jdbc:postgresql://10.0.1.10:5432,10.0.1.11:5432,10.0.1.12:5432/app".to_string(),
                ],
                user: "monitor".to_string(),
                password: "change-me".to_string(),
                primary_refresh_interval_ms: default_refresh_interval_ms(),
                probe_timeout_ms: default_probe_timeout_ms(),
            },
            checks: ChecksConfig {
                diagnostics: vec![
                    Diagnostic::InvalidIndexes,
                    Diagnostic::DuplicatedIndexes,
                    Diagnostic::ForeignKeysWithoutIndex,
                    Diagnostic::UnusedIndexes,
                    Diagnostic::TablesWithMissingIndexes,
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checks.enabled_diagnostics().len(), 27);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Test timeout not below the refresh interval
        config.cluster.probe_timeout_ms = config.cluster.primary_refresh_interval_ms;
        assert_err!(config.validate());

        config.cluster.probe_timeout_ms = 1000;
        assert_ok!(config.validate());

        config.cluster.urls = vec!["mysql://h1:3306/db".to_string()];
        assert_err!(config.validate());

        config.cluster.urls = vec!["pg://h1:5432/db".to_string()];
        config.checks.remaining_percentage_threshold = 150.0;
        assert_err!(config.validate());

        config.checks.remaining_percentage_threshold = 5.0;
        config.logging.format = "xml".to_string();
        assert_err!(config.validate());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cluster]
            urls = ["pg://h1:5432,h2:5432/db"]
            user = "monitor"
            password = "secret"

            [checks]
            diagnostics = ["unused_indexes", "invalid_indexes"]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.primary_refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.cluster.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.checks.schema, "public");
        assert_eq!(
            config.checks.enabled_diagnostics(),
            vec![Diagnostic::UnusedIndexes, Diagnostic::InvalidIndexes]
        );
        assert_eq!(config.logging.level, "info");
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_unknown_diagnostic_is_parse_error() {
        let content = r#"
            [cluster]
            urls = ["pg://h1:5432/db"]
            user = "monitor"
            password = "secret"

            [checks]
            diagnostics = ["slow_queries"]
        "#;
        assert!(toml::from_str::<Config>(content).is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // Test save and load
        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert!(loaded_config.validate().is_ok());
        assert_eq!(loaded_config.cluster.urls, config.cluster.urls);

        Config::create_example_config(temp_file.path()).unwrap();
        let example = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(example.checks.diagnostics.len(), 5);
        assert!(example.cluster.credentials().is_ok());
    }
}
