//! Delivery Client
//!
//! Ships snapshot entries to the collector with bounded concurrency and
//! retry.
//!
//! # Architecture
//!
//! - [`DeliveryClient`]: per report, a bounded queue feeding N workers; each
//!   worker sends one metric at a time under a [`RetryPolicy`]
//! - [`Transport`]: wire protocol seam
//!   - [`HttpTransport`]: gzip JSON over HTTP with optional HMAC header and
//!     RSA body encryption
//!   - [`GrpcTransport`]: `AddMetric` with gzip message compression and HMAC
//!     metadata
//!
//! Only connection-class and server-side failures are retried; a rejected
//! request fails immediately.
//!
//! [`RetryPolicy`]: crate::retry::RetryPolicy

mod client;
mod grpc;
mod http;
mod transport;

pub use client::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_WORKERS, DeliveryClient, DeliveryError};
pub use grpc::GrpcTransport;
pub use http::HttpTransport;
pub use transport::{Transport, TransportError, outbound_ip};
