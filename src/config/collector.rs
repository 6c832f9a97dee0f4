//! Collector tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::schema::TableTimezone;
use crate::storage::Distribution;

use super::validation::ConfigError;

/// Default flush check interval (1 second).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum flush check interval (10 milliseconds).
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Default table-existence cache capacity.
pub const DEFAULT_TABLE_CACHE_SIZE: usize = 1024;

/// Default table-existence cache entry lifetime (5 minutes).
pub const DEFAULT_TABLE_CACHE_TTL: Duration = Duration::from_secs(300);

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_table_cache_size() -> usize {
    DEFAULT_TABLE_CACHE_SIZE
}

fn default_table_cache_ttl() -> Duration {
    DEFAULT_TABLE_CACHE_TTL
}

/// Batching collector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Pending buffer check interval (default: 1s).
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum cached table-existence entries (default: 1024).
    #[serde(default = "default_table_cache_size")]
    pub table_cache_size: usize,

    /// Lifetime of a cached table-existence entry (default: 5m).
    #[serde(default = "default_table_cache_ttl", with = "humantime_serde")]
    pub table_cache_ttl: Duration,

    /// Timezone for daily table names (default: local).
    #[serde(default)]
    pub table_timezone: TableTimezone,

    /// Shard policy for event inserts (default: any).
    #[serde(default)]
    pub write_distribution: Distribution,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            table_cache_size: DEFAULT_TABLE_CACHE_SIZE,
            table_cache_ttl: DEFAULT_TABLE_CACHE_TTL,
            table_timezone: TableTimezone::default(),
            write_distribution: Distribution::default(),
        }
    }
}

impl CollectorConfig {
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_write_distribution(mut self, dist: Distribution) -> Self {
        self.write_distribution = dist;
        self
    }

    /// Validate collector settings.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the flush interval is below
    /// 10ms or the table cache has no capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval < MIN_FLUSH_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "collector flush_interval must be at least {}",
                humantime::format_duration(MIN_FLUSH_INTERVAL)
            )));
        }
        if self.table_cache_size == 0 {
            return Err(ConfigError::Validation(
                "collector table_cache_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_config_defaults() {
        let config: CollectorConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, CollectorConfig::default());
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.table_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.table_timezone, TableTimezone::Local);
        assert_eq!(config.write_distribution, Distribution::Any);
    }

    #[test]
    fn test_collector_config_parse() {
        let yaml = r#"
flush_interval: 250ms
table_cache_size: 16
table_cache_ttl: 1m
table_timezone: utc
write_distribution: all
"#;
        let config: CollectorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.table_cache_size, 16);
        assert_eq!(config.table_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.table_timezone, TableTimezone::Utc);
        assert_eq!(config.write_distribution, Distribution::All);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collector_config_validation() {
        let config = CollectorConfig::default().with_flush_interval(Duration::from_millis(5));
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            table_cache_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
