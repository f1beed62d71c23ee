//! Transport seam shared by the HTTP and gRPC senders.

use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::model::Metric;

/// Errors returned by a single send attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or broke mid-request.
    #[error("connection error: {0}")]
    Connect(String),

    /// The attempt exceeded its time budget.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Collector failed while handling the request (HTTP 5xx or equivalent).
    #[error("server error ({code}): {message}")]
    Server { code: String, message: String },

    /// Collector refused the request (HTTP 4xx or equivalent).
    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Payload could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport misconfiguration (bad address, unsupported option).
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout(_) | Self::Server { .. }
        )
    }
}

/// Wire protocol used to deliver one metric.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one delivery attempt.
    async fn send(&self, metric: &Metric) -> Result<(), TransportError>;

    /// Protocol name for logs.
    fn name(&self) -> &'static str;
}

/// Local address the OS would use to reach `target` (`host:port`).
///
/// Connecting a UDP socket sends no packets; it only resolves the route.
pub fn outbound_ip(target: &str) -> Option<IpAddr> {
    let remote = target.to_socket_addrs().ok()?.next()?;
    let bind = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(remote).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
