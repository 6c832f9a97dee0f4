//! Application configuration structures.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::collector::CollectorConfig;
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 10811;

// =============================================================================
// Server Configuration
// =============================================================================

/// Ingestion server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 10811).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ingestion server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Shard connection strings; the first one is the primary.
    pub databases: Vec<String>,

    /// Path of the event schema file, relative to the config file.
    pub schema: PathBuf,

    /// Batching collector configuration.
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Environment references in database DSNs are expanded, and a relative
    /// schema path is resolved against the config file's directory.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;

        if config.schema.is_relative()
            && let Some(dir) = path.parent()
        {
            config.schema = dir.join(&config.schema);
        }
        Ok(config)
    }

    /// Parse, expand and validate a YAML configuration.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.databases = config
            .databases
            .iter()
            .map(|dsn| expand_env_vars(dsn))
            .collect::<Result<_, _>>()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.databases.is_empty() {
            return Err(ConfigError::Validation(
                "at least one database is required".to_string(),
            ));
        }
        if let Some(idx) = self.databases.iter().position(|d| d.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "database {idx} has an empty connection string"
            )));
        }

        if self.schema.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "schema path must not be empty".to_string(),
            ));
        }

        self.collector.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            databases: vec!["memory://a".to_string()],
            schema: PathBuf::from("events.yaml"),
            collector: CollectorConfig::default(),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 10811);
    }

    #[test]
    fn test_from_yaml_minimal() {
        let config = AppConfig::from_yaml("databases: [\"memory://a\"]\nschema: events.yaml\n").unwrap();
        assert_eq!(config, self::config());
    }

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
server:
  bind: 127.0.0.1
  port: 9000
databases:
  - "sqlite:${SLUICE_TEST_UNSET_DATA:-data}/shard0.db?mode=rwc"
  - "memory://scratch"
schema: configs/events.yaml
collector:
  flush_interval: 500ms
  write_distribution: primary
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.databases[0], "sqlite:data/shard0.db?mode=rwc");
        assert_eq!(config.collector.flush_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_validation_errors() {
        let mut c = config();
        c.server.port = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.server.bind = "not-an-ip".to_string();
        assert!(c.validate().unwrap_err().to_string().contains("bind address"));

        let mut c = config();
        c.databases.clear();
        assert!(c.validate().is_err());

        let mut c = config();
        c.databases.push("  ".to_string());
        assert!(c.validate().is_err());

        let mut c = config();
        c.schema = PathBuf::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_resolves_schema_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.yaml");
        std::fs::write(&path, "databases: [\"memory://a\"]\nschema: events.yaml\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.schema, dir.path().join("events.yaml"));
    }
}
