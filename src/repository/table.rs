//! In-memory metric table shared by the memory and file backends.

use std::collections::{BTreeMap, HashMap};

use strum_macros::{AsRefStr, Display};

use crate::model::{Metric, ModelError};

/// Persistence state of a [`MetricTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum TableState {
    /// Created without restored data and never updated.
    #[default]
    Empty,
    /// Restored from a snapshot file, no updates since.
    Loaded,
    /// Holds updates not yet written to the snapshot file.
    Dirty,
    /// Every update has been written to the snapshot file.
    Flushed,
}

/// Name-keyed table of stored metrics.
///
/// Each accepted update bumps `generation`; a flush records the generation it
/// serialized so that a concurrent update keeps the table dirty.
#[derive(Debug, Default)]
pub struct MetricTable {
    metrics: HashMap<String, Metric>,
    state: TableState,
    generation: u64,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a decoded snapshot file.
    ///
    /// Entries whose key differs from the metric name are re-keyed by name.
    pub fn restore(snapshot: HashMap<String, Metric>) -> Self {
        let metrics: HashMap<String, Metric> = snapshot
            .into_values()
            .map(|metric| (metric.name.clone(), metric))
            .collect();
        Self {
            metrics,
            state: TableState::Loaded,
            generation: 0,
        }
    }

    /// Decode the snapshot file layout: `{name: {id, type, delta?, value?}}`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let snapshot: HashMap<String, Metric> = serde_json::from_slice(bytes)?;
        Ok(Self::restore(snapshot))
    }

    /// Encode the whole table in the snapshot file layout, keys sorted.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let sorted: BTreeMap<&str, &Metric> = self
            .metrics
            .iter()
            .map(|(name, metric)| (name.as_str(), metric))
            .collect();
        serde_json::to_vec(&sorted)
    }

    #[inline]
    pub fn state(&self) -> TableState {
        self.state
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.state == TableState::Dirty
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Record that the table contents at `generation` reached the file.
    pub fn mark_flushed(&mut self, generation: u64) {
        if self.generation == generation {
            self.state = TableState::Flushed;
        }
    }

    /// Merge one update and return the stored result.
    pub fn apply(&mut self, update: Metric) -> Result<Metric, ModelError> {
        let merged = match self.metrics.get_mut(&update.name) {
            Some(stored) => {
                stored.merge(&update)?;
                stored.clone()
            }
            None => {
                self.metrics.insert(update.name.clone(), update.clone());
                update
            }
        };
        self.touch();
        Ok(merged)
    }

    /// Merge a batch atomically: on any kind conflict nothing is applied.
    pub fn apply_batch(&mut self, updates: Vec<Metric>) -> Result<(), ModelError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut staged: HashMap<String, Metric> = HashMap::with_capacity(updates.len());
        for update in updates {
            match staged.get_mut(&update.name) {
                Some(pending) => pending.merge(&update)?,
                None => {
                    let merged = match self.metrics.get(&update.name) {
                        Some(stored) => {
                            let mut merged = stored.clone();
                            merged.merge(&update)?;
                            merged
                        }
                        None => update.clone(),
                    };
                    staged.insert(update.name, merged);
                }
            }
        }
        self.metrics.extend(staged);
        self.touch();
        Ok(())
    }

    /// Counter delta for `name`, if stored as a counter.
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.metrics.get(name).and_then(Metric::delta)
    }

    /// Gauge value for `name`, if stored as a gauge.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(Metric::gauge_value)
    }

    /// All stored metrics ordered by name.
    pub fn all(&self) -> Vec<Metric> {
        let mut all: Vec<Metric> = self.metrics.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.state = TableState::Dirty;
    }
}
