//! `telemon.v1.Metrics` service implementation.

use std::sync::Arc;

use prost::Message;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};

use crate::codec::Signer;
use crate::model::{Metric, ModelError};
use crate::repository::{Repository, RepositoryError};
use crate::rpc::v1::metrics_server::Metrics;
use crate::rpc::v1::{AddMetricRequest, AddMetricResponse};
use crate::rpc::{HASH_METADATA, REAL_IP_METADATA};
use crate::server::TrustedSubnet;

/// Map a repository failure onto a gRPC status.
pub fn status_from(err: RepositoryError) -> Status {
    match &err {
        RepositoryError::Validation(ModelError::KindMismatch { .. }) => {
            Status::failed_precondition(err.to_string())
        }
        RepositoryError::Validation(_) => Status::invalid_argument(err.to_string()),
        RepositoryError::NotFound { .. } => Status::not_found(err.to_string()),
        RepositoryError::Unavailable(_) | RepositoryError::Stopped => {
            Status::unavailable(err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "Repository failure");
            Status::internal(err.to_string())
        }
    }
}

/// `AddMetric` handler.
pub struct MetricsService {
    repo: Arc<dyn Repository>,
    verifier: Option<Signer>,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("backend", &self.repo.backend())
            .field("verifies", &self.verifier.is_some())
            .finish()
    }
}

impl MetricsService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            verifier: None,
        }
    }

    /// Verify `hashsha256` metadata when present.
    pub fn with_verifier(mut self, verifier: Option<Signer>) -> Self {
        self.verifier = verifier;
        self
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn add_metric(
        &self,
        request: Request<AddMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        let signature = request
            .metadata()
            .get(HASH_METADATA)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let proto = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;

        if let (Some(verifier), Some(signature)) = (&self.verifier, signature.as_deref()) {
            verifier
                .verify(&proto.encode_to_vec(), signature)
                .map_err(|_| Status::invalid_argument("hash mismatch"))?;
        }

        let metric = Metric::try_from(proto).map_err(|e| Status::invalid_argument(e.to_string()))?;
        tracing::debug!(metric = %metric.name, kind = %metric.kind(), "AddMetric");
        let stored = self.repo.update_metric(metric).await.map_err(status_from)?;

        Ok(Response::new(AddMetricResponse {
            metric: Some((&stored).into()),
        }))
    }
}

/// Rejects calls whose `x-real-ip` metadata is missing or outside the
/// trusted network. Without a configured network every call passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedSubnetInterceptor {
    subnet: Option<TrustedSubnet>,
}

impl TrustedSubnetInterceptor {
    pub fn new(subnet: Option<TrustedSubnet>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for TrustedSubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let Some(subnet) = &self.subnet else {
            return Ok(request);
        };
        let declared = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());
        if subnet.allows(declared) {
            Ok(request)
        } else {
            tracing::warn!(declared = ?declared, "Call from untrusted address rejected");
            Err(Status::permission_denied("source address is not trusted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::rpc::v1;
    use tonic::Code;

    fn service() -> MetricsService {
        MetricsService::new(Arc::new(MemoryRepository::new()))
    }

    fn request(metric: &Metric) -> Request<AddMetricRequest> {
        Request::new(AddMetricRequest {
            metric: Some(metric.into()),
        })
    }

    #[tokio::test]
    async fn test_add_metric_returns_merged_value() {
        let service = service();
        for _ in 0..3 {
            service
                .add_metric(request(&Metric::counter("PollCount", 1)))
                .await
                .unwrap();
        }
        let response = service
            .add_metric(request(&Metric::counter("PollCount", 1)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.metric.and_then(|m| m.delta), Some(4));
    }

    #[tokio::test]
    async fn test_add_metric_status_codes() {
        let service = service();
        let missing = service
            .add_metric(Request::new(AddMetricRequest { metric: None }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::InvalidArgument);

        service
            .add_metric(request(&Metric::counter("mixed", 1)))
            .await
            .unwrap();
        let mismatch = service
            .add_metric(request(&Metric::gauge("mixed", 1.0)))
            .await
            .unwrap_err();
        assert_eq!(mismatch.code(), Code::FailedPrecondition);

        let unspecified = Request::new(AddMetricRequest {
            metric: Some(v1::Metric {
                id: "x".into(),
                r#type: 0,
                delta: Some(1),
                value: None,
            }),
        });
        assert_eq!(
            service.add_metric(unspecified).await.unwrap_err().code(),
            Code::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_add_metric_verifies_signature() {
        let signer = Signer::new("secret");
        let service = service().with_verifier(Some(signer.clone()));
        let metric = Metric::gauge("Alloc", 2.0);

        let mut good = request(&metric);
        let encoded = v1::Metric::from(&metric).encode_to_vec();
        good.metadata_mut()
            .insert(HASH_METADATA, signer.sign(&encoded).parse().unwrap());
        service.add_metric(good).await.unwrap();

        let mut bad = request(&metric);
        bad.metadata_mut()
            .insert(HASH_METADATA, Signer::new("other").sign(&encoded).parse().unwrap());
        assert_eq!(
            service.add_metric(bad).await.unwrap_err().code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn test_interceptor_checks_real_ip() {
        let subnet = TrustedSubnet::parse("10.0.0.0/8").unwrap();
        let mut interceptor = TrustedSubnetInterceptor::new(Some(subnet));

        let mut inside = Request::new(());
        inside
            .metadata_mut()
            .insert(REAL_IP_METADATA, "10.1.2.3".parse().unwrap());
        assert!(interceptor.call(inside).is_ok());

        let mut outside = Request::new(());
        outside
            .metadata_mut()
            .insert(REAL_IP_METADATA, "192.168.0.1".parse().unwrap());
        assert_eq!(
            interceptor.call(outside).unwrap_err().code(),
            Code::PermissionDenied
        );
        assert_eq!(
            interceptor.call(Request::new(())).unwrap_err().code(),
            Code::PermissionDenied
        );

        let mut open = TrustedSubnetInterceptor::new(None);
        assert!(open.call(Request::new(())).is_ok());
    }
}
