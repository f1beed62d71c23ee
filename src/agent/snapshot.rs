//! Producer-side snapshot table.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::Metric;

/// Current value of every sampled metric, keyed by name.
///
/// Only the poll tick writes; the report tick takes a copy with
/// [`SnapshotStore::snapshot`], so a report never observes a half-applied
/// poll.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    metrics: Mutex<BTreeMap<String, Metric>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with zero values for `catalog`.
    pub fn with_catalog(catalog: impl IntoIterator<Item = Metric>) -> Self {
        let store = Self::new();
        store.record_all(catalog);
        store
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Metric>> {
        // The map is only ever replaced entry by entry, so a poisoned guard
        // still holds consistent data.
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the current reading for one metric.
    pub fn record(&self, metric: Metric) {
        self.lock().insert(metric.name.clone(), metric);
    }

    /// Set the current readings from one poll under a single lock.
    pub fn record_all(&self, metrics: impl IntoIterator<Item = Metric>) {
        let mut table = self.lock();
        for metric in metrics {
            table.insert(metric.name.clone(), metric);
        }
    }

    /// Copy of the current table, ordered by name.
    pub fn snapshot(&self) -> Vec<Metric> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
