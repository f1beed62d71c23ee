//! Telemon - runtime telemetry agent and collector.
//!
//! The agent samples process and host statistics on a poll interval and
//! reports the latest snapshot to a collector on a report interval, over
//! HTTP (JSON, gzip, optional HMAC signature and RSA encryption) or gRPC.
//! The collector merges reports into a repository where counters add and
//! gauges replace, and serves them back over the same surfaces.
//!
//! # Modules
//!
//! - [`model`]: metric kinds, values and their wire form
//! - [`agent`]: snapshot store, runtime sampler, poll/report scheduler
//! - [`delivery`]: worker-pool client and the HTTP/gRPC transports
//! - [`codec`]: gzip, HMAC-SHA256 and RSA payload encoding
//! - [`repository`]: memory, file and database backends
//! - [`server`]: axum HTTP API and tonic gRPC service
//! - [`rpc`]: protocol messages and the `AddMetric` service
//! - [`config`]: layered configuration for both binaries
//! - [`retry`]: bounded retry with a linear delay schedule

pub mod agent;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod model;
pub mod repository;
pub mod retry;
pub mod rpc;
pub mod server;

pub use model::{Metric, MetricKind, MetricValue};
pub use repository::Repository;
