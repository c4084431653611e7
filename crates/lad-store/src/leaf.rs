use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;

use lad_types::{KeyComponent, LadEntry, TimeType};

use crate::delta::{status_for, DeltaBaseline, DeltaResult, LadResult};
use crate::matcher::ContainerMatcher;
use crate::policy::ReapSettings;
use crate::stats::LeafStats;

/// Returned when a write hits a node that a concurrent reap or removal has
/// detached from the tree. The caller retries from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retired;

/// The key attributes below the identifier level: `(vcid, dss_id)`.
type SeriesId = (Option<u8>, Option<u8>);

/// History of one fully-qualified key.
#[derive(Default)]
struct Series {
    /// Ascending by sequence number.
    entries: VecDeque<LadEntry>,
    last_dropped_sequence: Option<u64>,
}

impl Series {
    fn insert(&mut self, entry: LadEntry) {
        let late = self
            .entries
            .back()
            .is_some_and(|last| last.sequence > entry.sequence);
        if late {
            let at = self.entries.partition_point(|e| e.sequence < entry.sequence);
            self.entries.insert(at, entry);
        } else {
            self.entries.push_back(entry);
        }
    }

    fn note_dropped(&mut self, sequence: u64) {
        self.last_dropped_sequence = Some(
            self.last_dropped_sequence
                .map_or(sequence, |d| d.max(sequence)),
        );
    }

    fn trim_to(&mut self, depth: usize) -> u64 {
        let mut trimmed = 0;
        while self.entries.len() > depth {
            if let Some(entry) = self.entries.pop_front() {
                self.note_dropped(entry.sequence);
                trimmed += 1;
            }
        }
        trimmed
    }

    fn evict_before(&mut self, time_type: TimeType, cutoff: i64) -> u64 {
        let mut kept = VecDeque::with_capacity(self.entries.len());
        let mut evicted = 0;
        for entry in std::mem::take(&mut self.entries) {
            if entry.record.millis_for(time_type) < cutoff {
                self.note_dropped(entry.sequence);
                evicted += 1;
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        evicted
    }

    fn drain(&mut self) -> usize {
        let n = self.entries.len();
        while let Some(entry) = self.entries.pop_front() {
            self.note_dropped(entry.sequence);
        }
        n
    }
}

#[derive(Default)]
struct LeafState {
    /// Emptied series stay so their drop marks keep answering delta queries.
    series: BTreeMap<SeriesId, Series>,
    inserted: u64,
    trimmed: u64,
    evicted: u64,
    retired: bool,
}

impl LeafState {
    fn len(&self) -> usize {
        self.series.values().map(|s| s.entries.len()).sum()
    }
}

/// Bounded, sequence-ordered histories of the most recent records for one
/// identifier.
///
/// Records sharing an identifier but differing in vcid or DSS id belong to
/// different keys. Each key keeps its own history, depth bound and drop mark.
pub(crate) struct LeafBuffer {
    identifier: KeyComponent,
    depth: usize,
    state: RwLock<LeafState>,
}

impl LeafBuffer {
    pub(crate) fn new(identifier: KeyComponent, depth: usize) -> Self {
        Self {
            identifier,
            depth: depth.max(1),
            state: RwLock::new(LeafState::default()),
        }
    }

    /// Store one entry, trimming the oldest entries of its key beyond depth.
    /// Returns the number of entries trimmed.
    ///
    /// Entries normally arrive in increasing sequence order; a late entry is
    /// placed by binary search so reads stay ordered.
    pub(crate) fn append(&self, entry: LadEntry) -> Result<u64, Retired> {
        let mut state = self.state.write();
        if state.retired {
            return Err(Retired);
        }
        let key = entry.key();
        let id = (key.vcid, key.dss_id);
        let series = state.series.entry(id).or_default();
        series.insert(entry);
        let trimmed = series.trim_to(self.depth);
        state.inserted += 1;
        state.trimmed += trimmed;
        Ok(trimmed)
    }

    /// Append matching entries to `out`, keeping at most the `limit` most
    /// recent per key when a limit is given.
    pub(crate) fn collect(
        &self,
        matcher: &dyn ContainerMatcher,
        limit: Option<usize>,
        out: &mut LadResult,
    ) {
        let state = self.state.read();
        let mut matched: Vec<LadEntry> = Vec::new();
        for series in state.series.values() {
            match limit {
                Some(n) => {
                    let start = matched.len();
                    matched.extend(
                        series
                            .entries
                            .iter()
                            .rev()
                            .filter(|e| matcher.matches_entry(e))
                            .take(n)
                            .cloned(),
                    );
                    matched[start..].reverse();
                }
                None => matched.extend(
                    series
                        .entries
                        .iter()
                        .filter(|e| matcher.matches_entry(e))
                        .cloned(),
                ),
            }
        }
        drop(state);

        for entry in matched {
            out.entry(entry.key().clone()).or_default().push(entry);
        }
    }

    /// Append entries newer than the caller's baseline to `out`, bucketed
    /// by completeness of their key.
    pub(crate) fn delta(
        &self,
        matcher: &dyn ContainerMatcher,
        baseline: &DeltaBaseline,
        out: &mut DeltaResult,
    ) {
        let state = self.state.read();
        for series in state.series.values() {
            for entry in series.entries.iter().filter(|e| matcher.matches_entry(e)) {
                let mark = baseline.for_key(entry.key());
                if entry.sequence > mark.unwrap_or(0) {
                    out.push(status_for(mark, series.last_dropped_sequence), entry.clone());
                }
            }
        }
    }

    /// Apply one reap pass. Returns `(empty, trimmed, evicted)`; an empty
    /// leaf may be detached by its parent.
    pub(crate) fn reap(
        &self,
        settings: &ReapSettings,
        time_type: TimeType,
        check_time_ms: i64,
        reapable: bool,
        ttl: Option<Duration>,
    ) -> (bool, u64, u64) {
        let mut state = self.state.write();
        let reduced = settings.reduced_depth(self.depth);
        let cutoff = match (reapable, ttl) {
            (true, Some(ttl)) => {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Some(check_time_ms.saturating_sub(ttl_ms))
            }
            _ => None,
        };

        let (mut trimmed, mut evicted) = (0, 0);
        for series in state.series.values_mut() {
            if let Some(depth) = reduced {
                trimmed += series.trim_to(depth);
            }
            if let Some(cutoff) = cutoff {
                evicted += series.evict_before(time_type, cutoff);
            }
        }
        state.trimmed += trimmed;
        state.evicted += evicted;

        (state.len() == 0, trimmed, evicted)
    }

    /// Mark the leaf retired if it is still empty.
    pub(crate) fn try_retire(&self) -> bool {
        let mut state = self.state.write();
        if state.len() == 0 {
            state.retired = true;
        }
        state.retired
    }

    /// Drop every entry and retire the leaf. Returns the number of entries dropped.
    pub(crate) fn retire(&self) -> usize {
        let mut state = self.state.write();
        let n = state.series.values_mut().map(Series::drain).sum();
        state.retired = true;
        n
    }

    pub(crate) fn identifier(&self) -> &KeyComponent {
        &self.identifier
    }

    /// Records held across all keys.
    pub(crate) fn len(&self) -> usize {
        self.state.read().len()
    }

    pub(crate) fn stats(&self) -> LeafStats {
        let state = self.state.read();
        let series = state.series.values();
        LeafStats {
            identifier: self.identifier.to_string(),
            depth: self.depth,
            records: state.len(),
            inserted: state.inserted,
            trimmed: state.trimmed,
            evicted: state.evicted,
            first_sequence: series.clone().filter_map(|s| s.entries.front()).map(|e| e.sequence).min(),
            last_sequence: series.clone().filter_map(|s| s.entries.back()).map(|e| e.sequence).max(),
            last_dropped_sequence: series.filter_map(|s| s.last_dropped_sequence).max(),
        }
    }
}
