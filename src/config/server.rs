//! Collector server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::validation::{
    ConfigError, interval_opt, lookup, normalize_listen_address, parse_bool, parse_interval,
    read_file,
};
pub use crate::repository::DEFAULT_STORE_INTERVAL;
use crate::repository::RepositoryBuilder;

/// Default HTTP listen address.
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0:8080";

/// Default snapshot file.
pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";

/// Telemon server: collects metrics over HTTP and gRPC.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "telemon-server", version, about, long_about = None)]
pub struct ServerArgs {
    /// HTTP listen address (host:port or :port)
    #[arg(short, long)]
    pub address: Option<String>,

    /// gRPC listen address; the gRPC API is disabled when unset
    #[arg(short, long = "grpc-address")]
    pub grpc_address: Option<String>,

    /// Snapshot interval (seconds or a duration); 0 writes on every update
    #[arg(short = 'i', long = "store-interval")]
    pub store_interval: Option<String>,

    /// Snapshot file; empty disables file persistence
    #[arg(short = 'f', long = "file-storage-path")]
    pub file_storage_path: Option<String>,

    /// Load the snapshot file at startup
    #[arg(short, long, value_parser = parse_bool)]
    pub restore: Option<bool>,

    /// Database connection string; selects the database backend
    #[arg(short = 'd', long = "database-dsn")]
    pub database_dsn: Option<String>,

    /// Shared signing key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Path to the private key (PEM) used to decrypt request bodies
    #[arg(long = "crypto-key")]
    pub crypto_key: Option<PathBuf>,

    /// Only accept reports whose declared address is in this CIDR
    #[arg(short, long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Server settings as read from a config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerFile {
    address: Option<String>,
    #[serde(alias = "g_address")]
    grpc_address: Option<String>,
    #[serde(deserialize_with = "interval_opt")]
    store_interval: Option<Duration>,
    #[serde(alias = "store_file")]
    file_storage_path: Option<String>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
}

/// Resolved server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    #[serde(skip_serializing)]
    pub database_dsn: Option<String>,
    #[serde(skip_serializing)]
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<IpNet>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            grpc_address: None,
            store_interval: DEFAULT_STORE_INTERVAL,
            file_storage_path: Some(PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

fn optional_path(raw: String) -> Option<PathBuf> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| PathBuf::from(raw))
}

fn parse_subnet(source: &str, raw: &str) -> Result<IpNet, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid(source, format!("invalid CIDR '{raw}': {e}")))
}

impl ServerConfig {
    /// Resolve from flags, the process environment and the config file.
    pub fn load(args: ServerArgs) -> Result<Self, ConfigError> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve with precedence environment > flags > file > defaults.
    pub fn resolve<F>(args: ServerArgs, env: F) -> Result<Self, ConfigError>
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
        config.address = normalize_listen_address(&config.address);
        config.grpc_address = config
            .grpc_address
            .as_deref()
            .map(normalize_listen_address);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let file: ServerFile = read_file(path)?;
        if let Some(address) = file.address {
            self.address = address;
        }
        if file.grpc_address.is_some() {
            self.grpc_address = file.grpc_address;
        }
        if let Some(interval) = file.store_interval {
            self.store_interval = interval;
        }
        if let Some(path) = file.file_storage_path {
            self.file_storage_path = optional_path(path);
        }
        if let Some(restore) = file.restore {
            self.restore = restore;
        }
        if file.database_dsn.is_some() {
            self.database_dsn = file.database_dsn;
        }
        if file.key.is_some() {
            self.key = file.key;
        }
        if file.crypto_key.is_some() {
            self.crypto_key = file.crypto_key;
        }
        if let Some(raw) = file.trusted_subnet {
            self.trusted_subnet = Some(parse_subnet("trusted_subnet", &raw)?);
        }
        Ok(())
    }

    fn apply_args(&mut self, args: ServerArgs) -> Result<(), ConfigError> {
        if let Some(address) = args.address {
            self.address = address;
        }
        if args.grpc_address.is_some() {
            self.grpc_address = args.grpc_address;
        }
        if let Some(raw) = args.store_interval {
            self.store_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("--store-interval", e))?;
        }
        if let Some(path) = args.file_storage_path {
            self.file_storage_path = optional_path(path);
        }
        if let Some(restore) = args.restore {
            self.restore = restore;
        }
        if args.database_dsn.is_some() {
            self.database_dsn = args.database_dsn;
        }
        if args.key.is_some() {
            self.key = args.key;
        }
        if args.crypto_key.is_some() {
            self.crypto_key = args.crypto_key;
        }
        if let Some(raw) = args.trusted_subnet {
            self.trusted_subnet = Some(parse_subnet("--trusted-subnet", &raw)?);
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
        if let Some(raw) = lookup(env, "STORE_INTERVAL") {
            self.store_interval =
                parse_interval(&raw).map_err(|e| ConfigError::invalid("STORE_INTERVAL", e))?;
        }
        if let Some(path) = lookup(env, "FILE_STORAGE_PATH") {
            self.file_storage_path = optional_path(path);
        }
        if let Some(raw) = lookup(env, "RESTORE") {
            self.restore = parse_bool(&raw).map_err(|e| ConfigError::invalid("RESTORE", e))?;
        }
        if let Some(dsn) = lookup(env, "DATABASE_DSN") {
            self.database_dsn = Some(dsn);
        }
        if let Some(key) = lookup(env, "KEY") {
            self.key = Some(key);
        }
        if let Some(path) = lookup(env, "CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(env, "TRUSTED_SUBNET") {
            self.trusted_subnet = Some(parse_subnet("TRUSTED_SUBNET", &raw)?);
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
                "listen address cannot be empty".to_string(),
            ));
        }
        if self.grpc_address.as_deref() == Some(self.address.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "HTTP and gRPC cannot share address '{}'",
                self.address
            )));
        }
        Ok(())
    }

    /// Signing key, if one is configured and non-empty.
    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    /// Repository builder for the configured backend.
    pub fn repository(&self) -> RepositoryBuilder {
        RepositoryBuilder::new()
            .database_dsn(self.database_dsn.clone())
            .file_path(self.file_storage_path.clone())
            .store_interval(self.store_interval)
            .restore(self.restore)
    }
}
