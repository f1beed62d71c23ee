//! Shared metric data model.
//!
//! A [`Metric`] is identified by its name and carries exactly one typed value:
//!
//! - [`MetricValue::Counter`]: `i64` delta, merged by addition
//! - [`MetricValue::Gauge`]: `f64` value, merged by replacement
//!
//! On the wire (JSON bodies and the snapshot file) a metric is the flat object
//! `{"id", "type", "delta"?, "value"?}`. Every conversion from that form goes
//! through [`MetricPayload`] validation, so a [`Metric`] in memory always holds
//! the field that matches its kind.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors raised while validating metric input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Metric name is missing or empty.
    #[error("metric id is empty")]
    EmptyName,

    /// Metric type is not `counter` or `gauge`.
    #[error("unknown metric type: {0}")]
    UnknownKind(String),

    /// The field required by the metric type is absent.
    #[error("metric '{name}' of type {kind} has no {field}")]
    MissingField {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    /// A field that does not belong to the metric type is populated.
    #[error("metric '{name}' of type {kind} must not carry {field}")]
    UnexpectedField {
        name: String,
        kind: MetricKind,
        field: &'static str,
    },

    /// Path-encoded value failed to parse.
    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: MetricKind, value: String },

    /// Update kind differs from the stored kind for the same name.
    #[error("metric '{name}' is a {stored}, got a {update} update")]
    KindMismatch {
        name: String,
        stored: MetricKind,
        update: MetricKind,
    },
}

/// Metric kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Accumulating delta.
    Counter,
    /// Point-in-time value.
    Gauge,
}

impl MetricKind {
    /// Parse a metric kind, mapping failures to [`ModelError::UnknownKind`].
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        Self::from_str(s).map_err(|_| ModelError::UnknownKind(s.to_string()))
    }
}

/// Typed metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    /// Kind of this value.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Parse a raw textual value for the given kind.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidValue {
            kind,
            value: raw.to_string(),
        };
        match kind {
            MetricKind::Counter => raw.trim().parse().map(Self::Counter).map_err(|_| invalid()),
            MetricKind::Gauge => {
                let value: f64 = raw.trim().parse().map_err(|_| invalid())?;
                if value.is_finite() {
                    Ok(Self::Gauge(value))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter(delta) => write!(f, "{delta}"),
            Self::Gauge(value) => write!(f, "{value}"),
        }
    }
}

/// A named metric with its current value.
///
/// Serializes to and from the flat wire object `{id, type, delta?, value?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricPayload", into = "MetricPayload")]
pub struct Metric {
    /// Unique metric name.
    pub name: String,
    /// Current value; its variant fixes the kind.
    pub value: MetricValue,
}

impl Metric {
    /// Create a counter metric.
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Create a gauge metric.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    /// Build a metric from path segments (`type`, `name`, `value`).
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self, ModelError> {
        let kind = MetricKind::parse(kind)?;
        if name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            value: MetricValue::parse(kind, raw)?,
        })
    }

    #[inline]
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Counter delta, if this is a counter.
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(delta) => Some(delta),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Gauge value, if this is a gauge.
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(value) => Some(value),
            MetricValue::Counter(_) => None,
        }
    }

    /// Apply `update` in place: counters add, gauges replace.
    ///
    /// Counter addition saturates at the `i64` bounds.
    pub fn merge(&mut self, update: &Metric) -> Result<(), ModelError> {
        match (&mut self.value, update.value) {
            (MetricValue::Counter(stored), MetricValue::Counter(delta)) => {
                *stored = stored.saturating_add(delta);
                Ok(())
            }
            (MetricValue::Gauge(stored), MetricValue::Gauge(value)) => {
                *stored = value;
                Ok(())
            }
            (stored, _) => Err(ModelError::KindMismatch {
                name: self.name.clone(),
                stored: stored.kind(),
                update: update.kind(),
            }),
        }
    }
}

/// Flat wire representation of a metric.
///
/// Missing `id` or `type` fail deserialization; field/type consistency is
/// checked by the `TryFrom<MetricPayload>` conversion into [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricPayload> for Metric {
    type Error = ModelError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        if payload.id.is_empty() {
            return Err(ModelError::EmptyName);
        }
        let kind = MetricKind::parse(&payload.kind)?;
        let value = match (kind, payload.delta, payload.value) {
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => MetricValue::Gauge(value),
            (MetricKind::Counter, None, _) => {
                return Err(ModelError::MissingField {
                    name: payload.id,
                    kind,
                    field: "delta",
                });
            }
            (MetricKind::Gauge, _, None) => {
                return Err(ModelError::MissingField {
                    name: payload.id,
                    kind,
                    field: "value",
                });
            }
            (MetricKind::Counter, Some(_), Some(_)) => {
                return Err(ModelError::UnexpectedField {
                    name: payload.id,
                    kind,
                    field: "value",
                });
            }
            (MetricKind::Gauge, Some(_), Some(_)) => {
                return Err(ModelError::UnexpectedField {
                    name: payload.id,
                    kind,
                    field: "delta",
                });
            }
        };
        Ok(Self {
            name: payload.id,
            value,
        })
    }
}

impl From<Metric> for MetricPayload {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(delta) => (Some(delta), None),
            MetricValue::Gauge(value) => (None, Some(value)),
        };
        Self {
            id: metric.name,
            kind: metric.value.kind().to_string(),
            delta,
            value,
        }
    }
}

/// Lookup key used by `POST /value`: `{id, type}` without a value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MetricQuery {
    /// Validate the query, returning the name and parsed kind.
    pub fn validate(&self) -> Result<(&str, MetricKind), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptyName);
        }
        Ok((&self.id, MetricKind::parse(&self.kind)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_case_insensitive() {
        assert_eq!(MetricKind::parse("counter").unwrap(), MetricKind::Counter);
        assert_eq!(MetricKind::parse("GAUGE").unwrap(), MetricKind::Gauge);
        assert!(matches!(
            MetricKind::parse("histogram"),
            Err(ModelError::UnknownKind(_))
        ));
        assert_eq!(MetricKind::Counter.to_string(), "counter");
    }

    #[test]
    fn test_metric_wire_format() {
        let counter = serde_json::to_value(Metric::counter("PollCount", 5)).unwrap();
        assert_eq!(counter, json!({"id": "PollCount", "type": "counter", "delta": 5}));

        let gauge = serde_json::to_value(Metric::gauge("Alloc", 42.5)).unwrap();
        assert_eq!(gauge, json!({"id": "Alloc", "type": "gauge", "value": 42.5}));

        let back: Metric = serde_json::from_value(gauge).unwrap();
        assert_eq!(back, Metric::gauge("Alloc", 42.5));
    }

    #[test]
    fn test_metric_rejects_inconsistent_payloads() {
        let cases = [
            json!({"type": "gauge", "value": 1.0}),
            json!({"id": "", "type": "gauge", "value": 1.0}),
            json!({"id": "a", "type": "summary", "value": 1.0}),
            json!({"id": "a", "type": "counter", "value": 1.0}),
            json!({"id": "a", "type": "gauge", "delta": 1}),
            json!({"id": "a", "type": "gauge", "delta": 1, "value": 1.0}),
            json!({"id": "a", "type": "counter"}),
        ];
        for case in cases {
            assert!(
                serde_json::from_value::<Metric>(case.clone()).is_err(),
                "accepted {case}"
            );
        }
    }

    #[test]
    fn test_merge_counter_adds_gauge_replaces() {
        let mut counter = Metric::counter("PollCount", 1);
        counter.merge(&Metric::counter("PollCount", 2)).unwrap();
        counter.merge(&Metric::counter("PollCount", -1)).unwrap();
        assert_eq!(counter.delta(), Some(2));

        let mut gauge = Metric::gauge("Alloc", 100.0);
        gauge.merge(&Metric::gauge("Alloc", 250.0)).unwrap();
        assert_eq!(gauge.gauge_value(), Some(250.0));
    }

    #[test]
    fn test_merge_kind_mismatch() {
        let mut counter = Metric::counter("x", 1);
        let err = counter.merge(&Metric::gauge("x", 1.0)).unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));
        assert_eq!(counter.delta(), Some(1));
    }

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(
            Metric::parse("counter", "PollCount", "3").unwrap(),
            Metric::counter("PollCount", 3)
        );
        assert_eq!(
            Metric::parse("gauge", "Alloc", "1.5").unwrap(),
            Metric::gauge("Alloc", 1.5)
        );
        assert!(Metric::parse("counter", "PollCount", "1.5").is_err());
        assert!(Metric::parse("gauge", "Alloc", "abc").is_err());
        assert!(Metric::parse("gauge", "Alloc", "NaN").is_err());
        assert!(Metric::parse("timer", "Alloc", "1").is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MetricValue::Gauge(250.0).to_string(), "250");
        assert_eq!(MetricValue::Gauge(0.25).to_string(), "0.25");
        assert_eq!(MetricValue::Counter(-3).to_string(), "-3");
    }
}
