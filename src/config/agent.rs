//! Agent configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, interval_opt, lookup, parse_interval, read_file};

/// Default collector address.
pub const DEFAULT_AGENT_ADDRESS: &str = "localhost:8080";

/// Default poll interval (2 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default report interval (10 seconds).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of concurrent senders.
pub const DEFAULT_RATE_LIMIT: usize = 3;

/// Telemon agent: samples runtime statistics and reports them to a collector.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "telemon-agent", version, about, long_about = None)]
pub struct AgentArgs {
    /// Collector HTTP address (host:port)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Collector gRPC address; selects the gRPC transport
    #[arg(short, long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// Poll interval (seconds or a duration such as "2s")
    #[arg(short, long = "poll-interval")]
    pub poll_interval: Option<String>,

    /// Report interval (seconds or a duration such as "10s")
    #[arg(short, long = "report-interval")]
    pub report_interval: Option<String>,

    /// Maximum number of concurrent sends
    #[arg(short = 'l', long = "rate-limit")]
    pub rate_limit: Option<usize>,

    /// Shared signing key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Path to the collector's public key (PEM)
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Agent settings as read from a config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentFile {
    address: Option<String>,
    #[serde(alias = "g_address")]
    grpc_address: Option<String>,
    #[serde(deserialize_with = "interval_opt")]
    poll_interval: Option<Duration>,
    #[serde(deserialize_with = "interval_opt")]
    report_interval: Option<Duration>,
    rate_limit: Option<usize>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
}

/// Resolved agent configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    pub rate_limit: usize,
    #[serde(skip_serializing)]
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_AGENT_ADDRESS.to_string(),
            grpc_address: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            rate_limit: DEFAULT_RATE_LIMIT,
            key: None,
            crypto_key: None,
        }
    }
}

impl AgentConfig {
    /// Resolve from flags, the process environment and the config file.
    pub fn load(args: AgentArgs) -> Result<Self, ConfigError> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve with precedence environment > flags > file > defaults.
    ///
    /// The config file path itself comes from `CONFIG` or `--config`.
    pub fn resolve<F>(args: AgentArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let path = lookup(&env, "CONFIG")
            .map(PathBuf::from)
            .or_else(|| args.config.clone());
        if let Some(path) = path {
            config.apply_file(&path)?;
        }
        config.apply_args(args)?;
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let file: AgentFile = read_file(path)?;
        if let Some(address) = file.address {
            self.address = address;
        }
        if file.grpc_address.is_some() {
            self.grpc_address = file.grpc_address;
        }
        if let Some(interval) = file.poll_interval {
            self.poll_interval = interval;
        }
        if let Some(interval) = file.report_interval {
            self.report_interval = interval;
        }
        if let Some(limit) = file.rate_limit {
            self.rate_limit = limit;
        }
        if file.key.is_some() {
            self.key = file.key;
        }
        if file.crypto_key.is_some() {
            self.crypto_key = file.crypto_key;
        }
        Ok(())
    }

    fn apply_args(&mut self, args: AgentArgs) -> Result<(), ConfigError> {
        if let Some(address) = args.address {
            self.address = address;
        }
        if args.grpc_address.is_some() {
            self.grpc_address = args.grpc_address;
        }
        if let Some(raw) = args.poll_interval {
            self.poll_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("--poll-interval", e))?;
        }
        if let Some(raw) = args.report_interval {
            self.report_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("--report-interval", e))?;
        }
        if let Some(limit) = args.rate_limit {
            self.rate_limit = limit;
        }
        if args.key.is_some() {
            self.key = args.key;
        }
        if args.crypto_key.is_some() {
            self.crypto_key = args.crypto_key;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(env, "ADDRESS") {
            self.address = address;
        }
        if let Some(address) = lookup(env, "GADDRESS") {
            self.grpc_address = Some(address);
        }
        if let Some(raw) = lookup(env, "POLL_INTERVAL") {
            self.poll_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("POLL_INTERVAL", e))?;
        }
        if let Some(raw) = lookup(env, "REPORT_INTERVAL") {
            self.report_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("REPORT_INTERVAL", e))?;
        }
        if let Some(raw) = lookup(env, "RATE_LIMIT") {
            self.rate_limit = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("RATE_LIMIT", e))?;
        }
        if let Some(key) = lookup(env, "KEY") {
            self.key = Some(key);
        }
        if let Some(path) = lookup(env, "CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "collector address cannot be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "report interval must be positive".to_string(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit must be at least 1".to_string(),
            ));
        }
        if self.crypto_key.is_some() && self.grpc_address.is_some() {
            return Err(ConfigError::ValidationError(
                "crypto key is only supported by the HTTP transport".to_string(),
            ));
        }
        Ok(())
    }

    /// Signing key, if one is configured and non-empty.
    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}
