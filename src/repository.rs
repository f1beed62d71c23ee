//! Repository Layer
//!
//! Collector-side storage that merges metric updates (counters add, gauges
//! replace) behind one capability interface, [`Repository`].
//!
//! # Backends
//!
//! - [`MemoryRepository`]: process-local table, nothing persisted
//! - [`FileRepository`]: in-memory table snapshotted to a JSON file on a
//!   ticker, on every update when the interval is zero, and on stop
//! - [`DbRepository`]: relational store with server-side atomic upserts and
//!   retry of connection-class errors
//!
//! [`RepositoryBuilder`] picks the backend once at startup.

mod builder;
mod db;
mod error;
mod file;
mod memory;
mod schema;
mod table;

pub use builder::RepositoryBuilder;
pub use db::DbRepository;
pub use error::RepositoryError;
pub use file::{DEFAULT_STORE_INTERVAL, FileRepository, FlushPolicy};
pub use memory::MemoryRepository;
pub use table::{MetricTable, TableState};

use crate::model::{Metric, MetricKind, MetricValue};

/// Merge-and-store capability shared by all backends.
///
/// Reads of unknown names return [`RepositoryError::NotFound`], never a zero
/// value. After [`Repository::stop`] every other call fails with
/// [`RepositoryError::Stopped`]; `stop` itself may be called any number of
/// times.
#[async_trait::async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Merge one update and return the stored result (accumulated delta for
    /// counters, the written value for gauges).
    async fn update_metric(&self, metric: Metric) -> Result<Metric, RepositoryError>;

    /// Merge a batch of updates.
    async fn update_metrics(&self, metrics: Vec<Metric>) -> Result<(), RepositoryError>;

    /// Accumulated delta of a counter.
    async fn counter_value(&self, name: &str) -> Result<i64, RepositoryError>;

    /// Current value of a gauge.
    async fn gauge_value(&self, name: &str) -> Result<f64, RepositoryError>;

    /// Every stored metric, ordered by name.
    async fn all_metrics(&self) -> Result<Vec<Metric>, RepositoryError>;

    /// Backend liveness.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Final flush/close. Idempotent.
    async fn stop(&self) -> Result<(), RepositoryError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Stored metric of the given kind.
    async fn metric(&self, kind: MetricKind, name: &str) -> Result<Metric, RepositoryError> {
        let value = match kind {
            MetricKind::Counter => MetricValue::Counter(self.counter_value(name).await?),
            MetricKind::Gauge => MetricValue::Gauge(self.gauge_value(name).await?),
        };
        Ok(Metric {
            name: name.to_string(),
            value,
        })
    }
}
