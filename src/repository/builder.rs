//! Repository backend selection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::repository::file::DEFAULT_STORE_INTERVAL;
use crate::repository::{
    DbRepository, FileRepository, FlushPolicy, MemoryRepository, Repository, RepositoryError,
};
use crate::retry::RetryPolicy;

/// Builder choosing the repository backend from startup configuration.
///
/// Precedence: a database DSN wins over a snapshot file path; with neither
/// the process keeps metrics in memory only.
#[derive(Debug, Clone)]
pub struct RepositoryBuilder {
    database_dsn: Option<String>,
    file_path: Option<PathBuf>,
    store_interval: Duration,
    restore: bool,
    retry: RetryPolicy,
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self {
            database_dsn: None,
            file_path: None,
            store_interval: DEFAULT_STORE_INTERVAL,
            restore: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the relational backend at this DSN. Empty strings are ignored.
    pub fn database_dsn(mut self, dsn: Option<impl Into<String>>) -> Self {
        self.database_dsn = dsn.map(Into::into).filter(|d| !d.is_empty());
        self
    }

    /// Use the file backend at this path. Empty paths are ignored.
    pub fn file_path(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.file_path = path
            .map(Into::into)
            .filter(|p| !p.as_os_str().is_empty());
        self
    }

    /// Snapshot interval for the file backend; zero flushes on every update.
    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    /// Whether the file backend loads the existing snapshot on start.
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Retry policy for the relational backend.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Open the selected backend.
    pub async fn build(self) -> Result<Arc<dyn Repository>, RepositoryError> {
        let repo: Arc<dyn Repository> = if let Some(dsn) = &self.database_dsn {
            Arc::new(DbRepository::connect_with(dsn, self.retry).await?)
        } else if let Some(path) = &self.file_path {
            let policy = FlushPolicy::from_interval(self.store_interval);
            Arc::new(FileRepository::open(path, policy, self.restore).await?)
        } else {
            Arc::new(MemoryRepository::new())
        };
        tracing::info!(backend = repo.backend(), "Repository ready");
        Ok(repo)
    }
}
