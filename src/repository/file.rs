//! File-snapshot repository backend.
//!
//! Metrics live in a [`MemoryRepository`]; the whole table is written to a
//! JSON file in the layout `{name: {id, type, delta?, value?}}`.
//!
//! # Flushing
//!
//! - [`FlushPolicy::Interval`]: a background ticker flushes when dirty
//! - [`FlushPolicy::Sync`]: every accepted update flushes before returning;
//!   a failed flush is logged and the table stays dirty for the next one
//! - [`Repository::stop`]: always flushes pending updates
//!
//! Each flush writes a temporary sibling file, syncs it, and renames it over
//! the target, so a crash mid-write leaves the previous snapshot intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::Metric;
use crate::repository::{MemoryRepository, MetricTable, Repository, RepositoryError, TableState};

/// Default snapshot interval (300 seconds).
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

/// When the snapshot file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush on a ticker with this period.
    Interval(Duration),
    /// Flush after every accepted update.
    Sync,
}

impl FlushPolicy {
    /// Zero means synchronous flushing.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            Self::Sync
        } else {
            Self::Interval(interval)
        }
    }

    #[inline]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync)
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::Interval(DEFAULT_STORE_INTERVAL)
    }
}

struct Shared {
    memory: MemoryRepository,
    path: PathBuf,
    // Serializes snapshot writers so an older table never overwrites a newer one.
    flush_lock: Mutex<()>,
}

impl Shared {
    /// Write the table if dirty. Returns whether a write happened.
    async fn flush(&self) -> Result<bool, RepositoryError> {
        let _guard = self.flush_lock.lock().await;
        let (bytes, generation) = {
            let table = self.memory.table.read().await;
            if !table.is_dirty() {
                return Ok(false);
            }
            (table.to_json()?, table.generation())
        };
        write_atomic(&self.path, &bytes).await?;
        self.memory.table.write().await.mark_flushed(generation);
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot flushed");
        Ok(true)
    }
}

/// Repository persisted to a JSON snapshot file.
pub struct FileRepository {
    shared: Arc<Shared>,
    policy: FlushPolicy,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FileRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRepository")
            .field("path", &self.shared.path)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FileRepository {
    /// Open the snapshot file, optionally restoring its contents, and start
    /// the flush ticker for [`FlushPolicy::Interval`].
    ///
    /// # Errors
    /// Fails if the file cannot be created or opened for writing. A file
    /// that exists but cannot be decoded is logged and ignored.
    pub async fn open(
        path: impl AsRef<Path>,
        policy: FlushPolicy,
        restore: bool,
    ) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Fail startup early if the location is not writable.
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let table = if restore {
            load_table(&path).await
        } else {
            MetricTable::new()
        };
        tracing::info!(
            path = %path.display(),
            restored = table.len(),
            state = %table.state(),
            policy = ?policy,
            "File repository opened"
        );

        let shared = Arc::new(Shared {
            memory: MemoryRepository::with_table(table),
            path,
            flush_lock: Mutex::new(()),
        });
        let cancel = CancellationToken::new();
        let flusher = match policy {
            FlushPolicy::Interval(period) => Some(tokio::spawn(run_flusher(
                Arc::clone(&shared),
                period,
                cancel.clone(),
            ))),
            FlushPolicy::Sync => None,
        };

        Ok(Self {
            shared,
            policy,
            cancel,
            flusher: Mutex::new(flusher),
        })
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Current persistence state of the table.
    pub async fn state(&self) -> TableState {
        self.shared.memory.table.read().await.state()
    }

    /// Write pending updates now. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, RepositoryError> {
        self.shared.flush().await
    }

    /// The update is already merged, so a flush failure must not be
    /// reported as a failed update: a retried counter would count twice.
    async fn after_update(&self) {
        if self.policy.is_sync()
            && let Err(e) = self.shared.flush().await
        {
            tracing::error!(path = %self.shared.path.display(), error = %e, "Synchronous snapshot flush failed");
        }
    }
}

#[async_trait::async_trait]
impl Repository for FileRepository {
    async fn update_metric(&self, metric: Metric) -> Result<Metric, RepositoryError> {
        let stored = self.shared.memory.update_metric(metric).await?;
        self.after_update().await;
        Ok(stored)
    }

    async fn update_metrics(&self, metrics: Vec<Metric>) -> Result<(), RepositoryError> {
        self.shared.memory.update_metrics(metrics).await?;
        self.after_update().await;
        Ok(())
    }

    async fn counter_value(&self, name: &str) -> Result<i64, RepositoryError> {
        self.shared.memory.counter_value(name).await
    }

    async fn gauge_value(&self, name: &str) -> Result<f64, RepositoryError> {
        self.shared.memory.gauge_value(name).await
    }

    async fn all_metrics(&self) -> Result<Vec<Metric>, RepositoryError> {
        self.shared.memory.all_metrics().await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.shared.memory.ping().await?;
        let parent = match self.shared.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        match tokio::fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(RepositoryError::Unavailable(format!(
                "'{}' is not a directory",
                parent.display()
            ))),
            Err(e) => Err(RepositoryError::Unavailable(format!(
                "'{}': {}",
                parent.display(),
                e
            ))),
        }
    }

    async fn stop(&self) -> Result<(), RepositoryError> {
        if !self.shared.memory.mark_stopped().await {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(handle) = self.flusher.lock().await.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Snapshot flusher task failed");
        }
        let written = self.shared.flush().await?;
        tracing::info!(
            path = %self.shared.path.display(),
            written,
            "File repository stopped"
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

impl Drop for FileRepository {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_flusher(shared: Arc<Shared>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = shared.flush().await {
                    tracing::error!(path = %shared.path.display(), error = %e, "Periodic snapshot flush failed");
                }
            }
        }
    }
    tracing::debug!("Snapshot flusher stopped");
}

/// Read and decode the snapshot file; any failure yields an empty table.
async fn load_table(path: &Path) -> MetricTable {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read snapshot, starting empty");
            return MetricTable::new();
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return MetricTable::new();
    }
    match MetricTable::from_json(&bytes) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot decode snapshot, starting empty");
            MetricTable::new()
        }
    }
}

/// Replace `path` with `bytes` via a synced temporary file and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn read_snapshot(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_restore_from_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(
            &path,
            r#"{"Alloc":{"id":"Alloc","type":"gauge","value":42.0}}"#,
        )
        .await
        .unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, true).await.unwrap();
        assert_eq!(repo.state().await, TableState::Loaded);
        assert_eq!(repo.gauge_value("Alloc").await.unwrap(), 42.0);
        repo.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_disabled_ignores_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, r#"{"Alloc":{"id":"Alloc","type":"gauge","value":1.0}}"#)
            .await
            .unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await.unwrap();
        assert_eq!(repo.state().await, TableState::Empty);
        assert!(repo.gauge_value("Alloc").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let repo = FileRepository::open(&path, FlushPolicy::Sync, true).await.unwrap();
        assert_eq!(repo.state().await, TableState::Empty);
        assert!(repo.all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_policy_flushes_every_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let repo = FileRepository::open(&path, FlushPolicy::from_interval(Duration::ZERO), true)
            .await
            .unwrap();

        repo.update_metric(Metric::counter("PollCount", 2)).await.unwrap();
        assert_eq!(repo.state().await, TableState::Flushed);
        assert_eq!(read_snapshot(&path).await["PollCount"]["delta"], 2);

        repo.update_metric(Metric::counter("PollCount", 3)).await.unwrap();
        assert_eq!(read_snapshot(&path).await["PollCount"]["delta"], 5);
        assert!(!dir.path().join("metrics.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_sync_flush_failure_keeps_update_accepted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        let path = nested.join("metrics.json");
        let repo = FileRepository::open(&path, FlushPolicy::Sync, false).await.unwrap();
        repo.update_metric(Metric::counter("PollCount", 1)).await.unwrap();
        assert_eq!(repo.state().await, TableState::Flushed);

        std::fs::remove_dir_all(&nested).unwrap();
        repo.update_metric(Metric::counter("PollCount", 1)).await.unwrap();
        repo.update_metrics(vec![Metric::counter("PollCount", 1)]).await.unwrap();
        assert_eq!(repo.counter_value("PollCount").await.unwrap(), 3);
        assert_eq!(repo.state().await, TableState::Dirty);

        std::fs::create_dir_all(&nested).unwrap();
        repo.stop().await.unwrap();
        assert_eq!(read_snapshot(&path).await["PollCount"]["delta"], 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_racing_stop_is_flushed_or_rejected() {
        for _ in 0..20 {
            let dir = tempdir().unwrap();
            let path = dir.path().join("metrics.json");
            let repo = Arc::new(
                FileRepository::open(&path, FlushPolicy::Interval(Duration::from_secs(3600)), false)
                    .await
                    .unwrap(),
            );

            let update = tokio::spawn({
                let repo = Arc::clone(&repo);
                async move { repo.update_metric(Metric::counter("PollCount", 1)).await }
            });
            let stop = tokio::spawn({
                let repo = Arc::clone(&repo);
                async move { repo.stop().await }
            });
            let accepted = update.await.unwrap();
            stop.await.unwrap().unwrap();

            match accepted {
                Ok(_) => assert_eq!(read_snapshot(&path).await["PollCount"]["delta"], 1),
                Err(e) => assert!(matches!(e, RepositoryError::Stopped)),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_policy_flushes_on_tick() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let repo = FileRepository::open(&path, FlushPolicy::Interval(Duration::from_secs(10)), false)
            .await
            .unwrap();

        repo.update_metric(Metric::gauge("Alloc", 1.5)).await.unwrap();
        assert_eq!(repo.state().await, TableState::Dirty);

        tokio::time::sleep(Duration::from_secs(11)).await;
        // Let the flusher finish its blocking file I/O.
        for _ in 0..50 {
            if repo.state().await == TableState::Flushed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.state().await, TableState::Flushed);
        assert_eq!(read_snapshot(&path).await["Alloc"]["value"], 1.5);
        repo.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_flushes_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.json");
        let repo = FileRepository::open(&path, FlushPolicy::Interval(Duration::from_secs(3600)), false)
            .await
            .unwrap();

        repo.update_metric(Metric::gauge("Alloc", 100.0)).await.unwrap();
        repo.update_metric(Metric::gauge("Alloc", 250.0)).await.unwrap();
        repo.stop().await.unwrap();
        repo.stop().await.unwrap();

        assert_eq!(read_snapshot(&path).await["Alloc"]["value"], 250.0);
        assert!(matches!(
            repo.update_metric(Metric::gauge("Alloc", 1.0)).await,
            Err(RepositoryError::Stopped)
        ));

        let reopened = FileRepository::open(&path, FlushPolicy::Sync, true).await.unwrap();
        assert_eq!(reopened.gauge_value("Alloc").await.unwrap(), 250.0);
    }

    #[tokio::test]
    async fn test_ping_reports_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        let repo = FileRepository::open(nested.join("metrics.json"), FlushPolicy::Sync, false)
            .await
            .unwrap();
        repo.ping().await.unwrap();

        std::fs::remove_dir_all(&nested).unwrap();
        assert!(matches!(repo.ping().await, Err(RepositoryError::Unavailable(_))));
    }
}
