//! Process-local repository backend.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::model::{Metric, MetricKind};
use crate::repository::{MetricTable, Repository, RepositoryError};

/// Repository holding metrics in a lock-guarded [`MetricTable`].
///
/// Also the core of [`FileRepository`](crate::repository::FileRepository),
/// which adds snapshot persistence around it.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    pub(super) table: RwLock<MetricTable>,
    stopped: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing table (e.g. restored from a snapshot file).
    pub fn with_table(table: MetricTable) -> Self {
        Self {
            table: RwLock::new(table),
            stopped: AtomicBool::new(false),
        }
    }

    /// Number of stored metrics.
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    fn ensure_running(&self) -> Result<(), RepositoryError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(RepositoryError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Mark stopped; returns `false` if it already was.
    ///
    /// Taken under the table write lock: every update either lands before
    /// this returns or fails with [`RepositoryError::Stopped`].
    pub(super) async fn mark_stopped(&self) -> bool {
        let _table = self.table.write().await;
        !self.stopped.swap(true, Ordering::AcqRel)
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn update_metric(&self, metric: Metric) -> Result<Metric, RepositoryError> {
        let mut table = self.table.write().await;
        self.ensure_running()?;
        Ok(table.apply(metric)?)
    }

    async fn update_metrics(&self, metrics: Vec<Metric>) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        self.ensure_running()?;
        Ok(table.apply_batch(metrics)?)
    }

    async fn counter_value(&self, name: &str) -> Result<i64, RepositoryError> {
        self.ensure_running()?;
        self.table
            .read()
            .await
            .counter(name)
            .ok_or_else(|| RepositoryError::not_found(MetricKind::Counter, name))
    }

    async fn gauge_value(&self, name: &str) -> Result<f64, RepositoryError> {
        self.ensure_running()?;
        self.table
            .read()
            .await
            .gauge(name)
            .ok_or_else(|| RepositoryError::not_found(MetricKind::Gauge, name))
    }

    async fn all_metrics(&self) -> Result<Vec<Metric>, RepositoryError> {
        self.ensure_running()?;
        Ok(self.table.read().await.all())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.ensure_running()
    }

    async fn stop(&self) -> Result<(), RepositoryError> {
        if self.mark_stopped().await {
            tracing::debug!("Memory repository stopped");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
