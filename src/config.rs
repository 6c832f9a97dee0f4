//! Configuration module for the sluice service.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Shard connection strings (with `${VAR}` expansion)
//! - Schema file location
//! - Collector tuning (flush interval, table cache, timezone, write policy)

mod app;
mod collector;
mod validation;

pub use app::{AppConfig, DEFAULT_BIND, DEFAULT_PORT, ServerConfig};
pub use collector::{
    CollectorConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_TABLE_CACHE_SIZE, DEFAULT_TABLE_CACHE_TTL,
    MIN_FLUSH_INTERVAL,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
