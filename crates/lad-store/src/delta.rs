//! Incremental ("delta") query types.
//!
//! A client keeps a [`DeltaBaseline`] of the highest sequence number it has
//! seen per key. Each delta query returns only newer entries, tagged with
//! whether the client can trust that nothing was lost in between.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use lad_types::{LadEntry, TelemetryKey};

/// Query results: matched entries per key, ascending by sequence number.
pub type LadResult = BTreeMap<TelemetryKey, Vec<LadEntry>>;

/// Completeness of the entries returned for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    /// Every entry newer than the baseline is included.
    Complete,
    /// Entries newer than the baseline were trimmed or evicted before
    /// this query ran.
    Incomplete,
    /// The caller supplied no baseline for the key.
    Unknown,
}

/// Per-key high-water marks supplied by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaBaseline {
    /// Applied to keys without an explicit entry.
    pub default: Option<u64>,
    pub per_key: HashMap<TelemetryKey, u64>,
}

impl DeltaBaseline {
    /// No baseline at all: every key is reported as [`DeltaStatus::Unknown`].
    pub fn unknown() -> Self {
        Self::default()
    }

    /// The same baseline for every key.
    pub fn since(sequence: u64) -> Self {
        Self {
            default: Some(sequence),
            per_key: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: TelemetryKey, sequence: u64) {
        self.per_key.insert(key, sequence);
    }

    pub fn for_key(&self, key: &TelemetryKey) -> Option<u64> {
        self.per_key.get(key).copied().or(self.default)
    }
}

/// Delta query results bucketed by completeness.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeltaResult {
    buckets: BTreeMap<DeltaStatus, LadResult>,
}

impl DeltaResult {
    pub(crate) fn push(&mut self, status: DeltaStatus, entry: LadEntry) {
        self.buckets
            .entry(status)
            .or_default()
            .entry(entry.key().clone())
            .or_default()
            .push(entry);
    }

    pub fn get(&self, status: DeltaStatus) -> Option<&LadResult> {
        self.buckets.get(&status)
    }

    pub fn statuses(&self) -> impl Iterator<Item = DeltaStatus> + '_ {
        self.buckets.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|r| r.is_empty())
    }

    pub fn total_records(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|r| r.values())
            .map(Vec::len)
            .sum()
    }

    /// Status reported for `key`, if any of its entries were returned.
    pub fn status_of(&self, key: &TelemetryKey) -> Option<DeltaStatus> {
        self.buckets
            .iter()
            .find(|(_, result)| result.contains_key(key))
            .map(|(status, _)| *status)
    }

    /// Raise `baseline` to the highest sequence returned for each key.
    pub fn advance(&self, baseline: &mut DeltaBaseline) {
        for result in self.buckets.values() {
            for (key, entries) in result {
                if let Some(last) = entries.last() {
                    let mark = baseline.per_key.entry(key.clone()).or_insert(0);
                    *mark = (*mark).max(last.sequence);
                }
            }
        }
    }

    pub(crate) fn sort(&mut self) {
        for result in self.buckets.values_mut() {
            for entries in result.values_mut() {
                entries.sort_by_key(|e| e.sequence);
            }
        }
    }
}

/// Completeness of a delta from `baseline` for a leaf that has dropped
/// entries up to `last_dropped`.
pub(crate) fn status_for(baseline: Option<u64>, last_dropped: Option<u64>) -> DeltaStatus {
    match (baseline, last_dropped) {
        (None, _) => DeltaStatus::Unknown,
        (Some(b), Some(d)) if d > b => DeltaStatus::Incomplete,
        _ => DeltaStatus::Complete,
    }
}
