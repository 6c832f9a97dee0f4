//! Configuration errors and value helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Parse duration string using humantime.
///
/// Supports formats such as `30s`, `1m`, `5m30s`, `100ms`.
///
/// # Examples
///
/// ```
/// use sluice::config::parse_duration;
///
/// assert_eq!(parse_duration("1s").unwrap().as_millis(), 1000);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand `${VAR}` and `${VAR:-default}` references.
///
/// # Errors
/// Returns `ConfigError::Validation` naming the first variable that is
/// unset and has no default.
pub fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    let mut missing = None;
    let expanded = regex.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match (std::env::var(var_name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::Validation(format!(
            "environment variable '{var}' is not set"
        ))),
        None => Ok(expanded.into_owned()),
    }
}
