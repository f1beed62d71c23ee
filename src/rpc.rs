//! gRPC Protocol
//!
//! Message types and the `telemon.v1.Metrics` service.
//!
//! # Architecture
//!
//! - [`v1`]: prost/tonic code generated from `proto/telemon.proto`
//! - [`MetricsService`]: `AddMetric` handler over a
//!   [`Repository`](crate::repository::Repository)
//! - [`TrustedSubnetInterceptor`]: rejects calls whose `x-real-ip` metadata
//!   is missing or outside the trusted network
//!
//! Signed calls carry `hashsha256` metadata: the base64 HMAC-SHA256 of the
//! protobuf encoding of the request's metric.

mod service;

pub use service::{MetricsService, TrustedSubnetInterceptor, status_from};

/// Generated protocol code.
#[allow(clippy::all, missing_docs)]
pub mod v1 {
    include!("rpc/telemon.v1.rs");
}

use crate::model::{Metric, MetricKind, MetricPayload, MetricValue, ModelError};

/// Metadata key carrying the request signature.
pub const HASH_METADATA: &str = "hashsha256";

/// Metadata key carrying the sender's declared source address.
pub const REAL_IP_METADATA: &str = "x-real-ip";

impl From<&Metric> for v1::Metric {
    fn from(metric: &Metric) -> Self {
        let (kind, delta, value) = match metric.value {
            MetricValue::Counter(delta) => (v1::MetricType::Counter, Some(delta), None),
            MetricValue::Gauge(value) => (v1::MetricType::Gauge, None, Some(value)),
        };
        Self {
            id: metric.name.clone(),
            r#type: kind as i32,
            delta,
            value,
        }
    }
}

impl TryFrom<v1::Metric> for Metric {
    type Error = ModelError;

    fn try_from(proto: v1::Metric) -> Result<Self, Self::Error> {
        let kind = match v1::MetricType::try_from(proto.r#type) {
            Ok(v1::MetricType::Counter) => MetricKind::Counter,
            Ok(v1::MetricType::Gauge) => MetricKind::Gauge,
            Ok(v1::MetricType::Unspecified) | Err(_) => {
                return Err(ModelError::UnknownKind(proto.r#type.to_string()));
            }
        };
        Metric::try_from(MetricPayload {
            id: proto.id,
            kind: kind.to_string(),
            delta: proto.delta,
            value: proto.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_conversion() {
        let counter = Metric::counter("PollCount", 3);
        let proto = v1::Metric::from(&counter);
        assert_eq!(proto.r#type, v1::MetricType::Counter as i32);
        assert_eq!(proto.delta, Some(3));
        assert_eq!(proto.value, None);
        assert_eq!(Metric::try_from(proto).unwrap(), counter);

        let gauge = Metric::gauge("Alloc", 1.25);
        assert_eq!(Metric::try_from(v1::Metric::from(&gauge)).unwrap(), gauge);
    }

    #[test]
    fn test_proto_validation() {
        let unspecified = v1::Metric {
            id: "x".into(),
            r#type: v1::MetricType::Unspecified as i32,
            delta: Some(1),
            value: None,
        };
        assert!(matches!(
            Metric::try_from(unspecified),
            Err(ModelError::UnknownKind(_))
        ));

        let missing_value = v1::Metric {
            id: "Alloc".into(),
            r#type: v1::MetricType::Gauge as i32,
            delta: Some(1),
            value: None,
        };
        assert!(Metric::try_from(missing_value).is_err());

        let empty_id = v1::Metric {
            id: String::new(),
            r#type: v1::MetricType::Counter as i32,
            delta: Some(1),
            value: None,
        };
        assert_eq!(Metric::try_from(empty_id), Err(ModelError::EmptyName));
    }
}
