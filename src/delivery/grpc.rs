//! gRPC transport.

use std::net::IpAddr;

use prost::Message;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use crate::codec::Signer;
use crate::delivery::{Transport, TransportError};
use crate::model::Metric;
use crate::rpc::v1::AddMetricRequest;
use crate::rpc::v1::metrics_client::MetricsClient;
use crate::rpc::{HASH_METADATA, REAL_IP_METADATA, v1};

/// Sends each metric with the `AddMetric` call.
///
/// Messages are gzip-compressed by tonic; `hashsha256` metadata signs the
/// protobuf encoding of the metric.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    signer: Option<Signer>,
    real_ip: Option<IpAddr>,
}

impl GrpcTransport {
    /// Create a transport for a collector at `address` (`host:port` or a
    /// full URI). The channel connects lazily on first use.
    pub fn new(address: &str) -> Result<Self, TransportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| TransportError::Config(e.to_string()))?
            .connect_lazy();
        let client = MetricsClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        Ok(Self {
            client,
            signer: None,
            real_ip: None,
        })
    }

    /// Sign every call with this key.
    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Declare this source address in `x-real-ip` metadata.
    pub fn with_real_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.real_ip = ip;
        self
    }
}

fn classify(status: Status) -> TransportError {
    let code = format!("{:?}", status.code());
    let message = status.message().to_string();
    match status.code() {
        Code::Unavailable
        | Code::Unknown
        | Code::Internal
        | Code::DeadlineExceeded
        | Code::ResourceExhausted
        | Code::Aborted => TransportError::Server { code, message },
        _ => TransportError::Rejected { code, message },
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
        let proto = v1::Metric::from(metric);
        let signature = self.signer.as_ref().map(|s| s.sign(&proto.encode_to_vec()));

        let mut request = Request::new(AddMetricRequest {
            metric: Some(proto),
        });
        let metadata = request.metadata_mut();
        if let Some(signature) = signature {
            let value: MetadataValue<Ascii> = signature
                .parse()
                .map_err(|_| TransportError::Config("signature is not valid metadata".into()))?;
            metadata.insert(HASH_METADATA, value);
        }
        if let Some(ip) = self.real_ip {
            let value: MetadataValue<Ascii> = ip
                .to_string()
                .parse()
                .map_err(|_| TransportError::Config("address is not valid metadata".into()))?;
            metadata.insert(REAL_IP_METADATA, value);
        }

        let mut client = self.client.clone();
        client.add_metric(request).await.map_err(classify)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "grpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify(Status::unavailable("down")).is_retryable());
        assert!(classify(Status::internal("boom")).is_retryable());
        assert!(!classify(Status::invalid_argument("bad")).is_retryable());
        assert!(!classify(Status::permission_denied("no")).is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        assert!(matches!(
            GrpcTransport::new("bad uri with spaces"),
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = GrpcTransport::new(&address).unwrap();
        let err = transport
            .send(&Metric::gauge("Alloc", 1.0))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
