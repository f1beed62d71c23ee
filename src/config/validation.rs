//! Value parsing shared by the agent and server configuration.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub(crate) fn invalid(source: &str, message: impl std::fmt::Display) -> Self {
        Self::ValidationError(format!("{source}: {message}"))
    }
}

/// Parse duration string using humantime.
///
/// Supports various formats: `30s`, `1m`, `5m30s`, `1h`, `2h30m`, `1d`, `100ms`, etc.
///
/// # Examples
///
/// ```
/// use telemon::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse an interval given either as whole seconds (`10`) or as a
/// humantime string (`10s`, `1m`).
///
/// ```
/// use std::time::Duration;
/// use telemon::config::parse_interval;
///
/// assert_eq!(parse_interval("10").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
/// ```
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    match s.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => parse_duration(s),
    }
}

/// Parse a boolean the way command-line tools commonly accept it.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(format!("invalid boolean '{other}'")),
    }
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Read a YAML (or JSON) config file after `${VAR}` expansion.
pub(crate) fn read_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_yaml::from_str(&expand_env_vars(&content))?)
}

/// Environment lookup that treats empty values as unset.
pub(crate) fn lookup<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name).filter(|v| !v.trim().is_empty())
}

/// Config-file interval: an integer number of seconds or a duration string.
pub(crate) fn interval_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Raw::Text(text)) => parse_interval(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// `:8080` listens on every interface.
pub(crate) fn normalize_listen_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_valid() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2h 30m").unwrap(), Duration::from_secs(9000));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("30x").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_parse_interval_accepts_bare_seconds() {
        assert_eq!(parse_interval("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_interval(" 300 ").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("F"), Ok(false));
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("dsn: ${NONEXISTENT_TELEMON_DSN_12345:-sqlite::memory:}");
        assert_eq!(result, "dsn: sqlite::memory:");
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_interval_in_file() {
        #[derive(Deserialize)]
        struct File {
            #[serde(default, deserialize_with = "interval_opt")]
            every: Option<Duration>,
        }

        let numeric: File = serde_yaml::from_str("every: 5").unwrap();
        assert_eq!(numeric.every, Some(Duration::from_secs(5)));
        let text: File = serde_yaml::from_str("every: 2m").unwrap();
        assert_eq!(text.every, Some(Duration::from_secs(120)));
        let missing: File = serde_yaml::from_str("{}").unwrap();
        assert_eq!(missing.every, None);
        assert!(serde_yaml::from_str::<File>("every: later").is_err());
    }

    #[test]
    fn test_normalize_listen_address() {
        assert_eq!(normalize_listen_address(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_address("127.0.0.1:9"), "127.0.0.1:9");
    }
}
