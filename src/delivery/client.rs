//! Worker-pool delivery with retry.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::delivery::{Transport, TransportError};
use crate::model::Metric;
use crate::retry::RetryPolicy;

/// Default number of concurrent send workers.
pub const DEFAULT_WORKERS: usize = 3;

/// Default time budget of one send attempt (700 milliseconds).
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(700);

/// Errors returned by [`DeliveryClient`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The client was drained and accepts no more work.
    #[error("delivery client is closed")]
    Closed,
}

struct Inner {
    transport: Arc<dyn Transport>,
    workers: usize,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    /// Caps concurrent sends at `workers` across overlapping snapshots.
    permits: Semaphore,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Fans metrics out to a bounded pool of retrying senders.
///
/// Cloning is cheap; clones share the transport and the in-flight task set.
#[derive(Clone)]
pub struct DeliveryClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("transport", &self.inner.transport.name())
            .field("workers", &self.inner.workers)
            .field("policy", &self.inner.policy)
            .field("attempt_timeout", &self.inner.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl DeliveryClient {
    /// Create a client with default workers, retry policy and attempt timeout.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(
            transport,
            DEFAULT_WORKERS,
            RetryPolicy::default(),
            DEFAULT_ATTEMPT_TIMEOUT,
        )
    }

    /// Create a client. `workers` is clamped to at least one.
    pub fn with_options(
        transport: Arc<dyn Transport>,
        workers: usize,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(Inner {
                transport,
                workers,
                policy,
                attempt_timeout,
                permits: Semaphore::new(workers),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Deliver one metric, retrying transient failures.
    ///
    /// Each attempt is bounded by the attempt timeout; the overall duration
    /// is at most `max_attempts * attempt_timeout` plus the retry delays.
    pub async fn send_one(&self, metric: &Metric) -> Result<(), TransportError> {
        let transport = &self.inner.transport;
        let timeout = self.inner.attempt_timeout;
        self.inner
            .policy
            .run(
                move || async move {
                    tokio::time::timeout(timeout, transport.send(metric))
                        .await
                        .unwrap_or(Err(TransportError::Timeout(timeout)))
                },
                TransportError::is_retryable,
            )
            .await
    }

    /// Enqueue `metrics` for delivery by a fresh pool of workers.
    ///
    /// Returns once every metric is enqueued and the queue is closed, with
    /// the number enqueued. Per-metric failures are logged by the workers.
    /// Enqueueing stops early if the client is drained meanwhile.
    pub async fn send_all(&self, metrics: Vec<Metric>) -> Result<usize, DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let (tx, rx) = mpsc::channel::<Metric>(self.inner.workers);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..self.inner.workers {
            let client = self.clone();
            let rx = Arc::clone(&rx);
            self.inner
                .tracker
                .spawn(async move { client.run_worker(worker, rx).await });
        }

        let total = metrics.len();
        let mut enqueued = 0;
        for metric in metrics {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                sent = tx.send(metric) => {
                    if sent.is_err() {
                        break;
                    }
                    enqueued += 1;
                }
            }
        }
        drop(tx);

        if enqueued < total {
            tracing::warn!(enqueued, total, "Delivery interrupted, remaining metrics dropped");
        } else {
            tracing::debug!(enqueued, transport = self.inner.transport.name(), "Snapshot enqueued");
        }
        Ok(enqueued)
    }

    /// Run [`send_all`](Self::send_all) in the background.
    ///
    /// The task is tracked, so [`drain`](Self::drain) waits for it.
    pub fn dispatch(&self, metrics: Vec<Metric>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let client = self.clone();
        self.inner.tracker.spawn(async move {
            if let Err(e) = client.send_all(metrics).await {
                tracing::warn!(error = %e, "Snapshot not delivered");
            }
        });
        Ok(())
    }

    /// Stop taking work and wait up to `deadline` for in-flight sends.
    ///
    /// Queued metrics that no worker has started are abandoned. Returns
    /// whether every task finished in time.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        let in_flight = self.inner.tracker.len();
        match tokio::time::timeout(deadline, self.inner.tracker.wait()).await {
            Ok(()) => {
                tracing::info!(in_flight, "Delivery drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.inner.tracker.len(),
                    deadline = ?deadline,
                    "Delivery drain timed out"
                );
                false
            }
        }
    }

    async fn run_worker(self, worker: usize, jobs: Arc<Mutex<mpsc::Receiver<Metric>>>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => None,
                next = async { jobs.lock().await.recv().await } => next,
            };
            let Some(metric) = next else { break };

            // A previous snapshot may still hold permits; the total number
            // of sends in flight never exceeds `workers`.
            let permit = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                permit = self.inner.permits.acquire() => permit,
            };
            let Ok(_permit) = permit else { break };

            match self.send_one(&metric).await {
                Ok(()) => {
                    tracing::debug!(worker, metric = %metric.name, value = %metric.value, "Metric delivered");
                }
                Err(e) => {
                    tracing::error!(worker, metric = %metric.name, error = %e, "Metric delivery failed");
                }
            }
        }
        tracing::trace!(worker, "Delivery worker done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport recording sends and failing the first `failures` attempts.
    #[derive(Default)]
    struct FakeTransport {
        attempts: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        failures: usize,
        retryable: bool,
        delay: Duration,
        delivered: std::sync::Mutex<Vec<Metric>>,
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(if self.retryable {
                    TransportError::Server {
                        code: "503".into(),
                        message: "overloaded".into(),
                    }
                } else {
                    TransportError::Rejected {
                        code: "400".into(),
                        message: "bad request".into(),
                    }
                });
            }
            self.delivered.lock().unwrap().push(metric.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn client(transport: Arc<FakeTransport>) -> DeliveryClient {
        DeliveryClient::with_options(transport, 3, RetryPolicy::default(), DEFAULT_ATTEMPT_TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_one_retries_server_errors() {
        let transport = Arc::new(FakeTransport {
            failures: 2,
            retryable: true,
            ..Default::default()
        });
        client(Arc::clone(&transport))
            .send_one(&Metric::gauge("Alloc", 1.0))
            .await
            .unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_one_does_not_retry_rejection() {
        let transport = Arc::new(FakeTransport {
            failures: 10,
            retryable: false,
            ..Default::default()
        });
        let err = client(Arc::clone(&transport))
            .send_one(&Metric::gauge("Alloc", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_bounded_by_attempt_timeouts() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_secs(3600),
            ..Default::default()
        });
        let client = client(Arc::clone(&transport));
        let started = tokio::time::Instant::now();
        let err = client.send_one(&Metric::gauge("Alloc", 1.0)).await.unwrap_err();

        assert!(matches!(err, TransportError::Timeout(_)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        let bound = DEFAULT_ATTEMPT_TIMEOUT * 4 + RetryPolicy::default().total_delay();
        assert!(started.elapsed() <= bound + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_send_all_delivers_every_metric() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(Arc::clone(&transport));
        let metrics: Vec<Metric> = (0..20)
            .map(|i| Metric::gauge(format!("g{i}"), f64::from(i)))
            .collect();

        assert_eq!(client.send_all(metrics).await.unwrap(), 20);
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.delivered.lock().unwrap().len() < 20 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workers did not deliver the snapshot");

        let mut names: Vec<String> = transport
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 20);
        assert!(client.drain(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_work() {
        let client = client(Arc::new(FakeTransport::default()));
        assert!(client.drain(Duration::from_secs(1)).await);
        assert!(client.is_closed());
        assert!(matches!(
            client.send_all(vec![Metric::gauge("Alloc", 1.0)]).await,
            Err(DeliveryError::Closed)
        ));
        assert!(client.dispatch(Vec::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_deadline_elapses_with_stuck_sends() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_secs(3600),
            ..Default::default()
        });
        let client = DeliveryClient::with_options(
            Arc::clone(&transport) as Arc<dyn Transport>,
            1,
            RetryPolicy::none(),
            Duration::from_secs(3600),
        );
        client.dispatch(vec![Metric::gauge("Alloc", 1.0)]).unwrap();
        while transport.attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!client.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_snapshots_share_the_worker_limit() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let client = DeliveryClient::with_options(
            Arc::clone(&transport) as Arc<dyn Transport>,
            3,
            RetryPolicy::none(),
            Duration::from_secs(10),
        );
        let snapshot = || -> Vec<Metric> {
            (0..20)
                .map(|i| Metric::gauge(format!("g{i}"), f64::from(i)))
                .collect()
        };

        for _ in 0..3 {
            client.dispatch(snapshot()).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(transport.delivered.lock().unwrap().len(), 60);
        let peak = transport.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{peak} concurrent sends with 3 workers");
        assert!(client.drain(Duration::from_secs(1)).await);
    }
}
