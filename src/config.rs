//! Configuration for the agent and server binaries.
//!
//! Each binary resolves its settings from four layers, lowest precedence
//! first: built-in defaults, a YAML config file (`--config` or `CONFIG`;
//! JSON files parse too), command-line flags, and environment variables.
//!
//! Intervals accept whole seconds (`10`) or humantime strings (`10s`).

mod agent;
mod server;
mod validation;

pub use agent::{
    AgentArgs, AgentConfig, DEFAULT_AGENT_ADDRESS, DEFAULT_POLL_INTERVAL, DEFAULT_RATE_LIMIT,
    DEFAULT_REPORT_INTERVAL,
};
pub use server::{
    DEFAULT_FILE_STORAGE_PATH, DEFAULT_SERVER_ADDRESS, DEFAULT_STORE_INTERVAL, ServerArgs,
    ServerConfig,
};
pub use validation::{ConfigError, expand_env_vars, parse_bool, parse_duration, parse_interval};
