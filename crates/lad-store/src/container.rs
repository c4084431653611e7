use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use lad_types::{ContainerLevel, LadEntry};

use crate::delta::{DeltaBaseline, DeltaResult, LadResult};
use crate::error::StoreResult;
use crate::leaf::{LeafBuffer, Retired};
use crate::matcher::{ContainerMatcher, LadQuery};
use crate::node::{BranchNode, Node, ReapContext};
use crate::policy::{ContainerPolicy, ReapSettings};
use crate::stats::{ContainerStats, ContainerSummary, NodeMetadata, ReapReport};

#[derive(Default)]
struct Counters {
    inserts: AtomicU64,
    insert_failures: AtomicU64,
    insert_nanos: AtomicU64,
    queries: AtomicU64,
    query_nanos: AtomicU64,
    reaps: AtomicU64,
    trimmed: AtomicU64,
    evicted: AtomicU64,
}

impl Counters {
    fn query_done(&self, started: Instant) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }
}

fn average_micros(total_nanos: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_nanos as f64 / count as f64 / 1_000.0
    }
}

/// Root of the container hierarchy.
///
/// All operations take `&self` and are safe to call concurrently: inserts
/// from the inserter pool, queries from clients and the reaper all share one
/// `Arc<MasterContainer>`. Reads return copies, so results stay valid while
/// the container keeps changing.
pub struct MasterContainer {
    root: Arc<BranchNode>,
    policy: ContainerPolicy,
    counters: Counters,
}

impl MasterContainer {
    pub fn new(policy: ContainerPolicy) -> Self {
        Self {
            root: Arc::new(BranchNode::new(ContainerLevel::Master, None)),
            policy,
            counters: Counters::default(),
        }
    }

    pub fn policy(&self) -> &ContainerPolicy {
        &self.policy
    }

    /// The hierarchy levels, root first.
    pub fn levels(&self) -> &'static [ContainerLevel] {
        &ContainerLevel::ALL
    }

    /// Store one sequenced record, creating any missing nodes on its path.
    pub fn insert(&self, entry: LadEntry) -> StoreResult<()> {
        let started = Instant::now();
        if let Err(e) = entry.record.validate() {
            self.counters.insert_failures.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        // Retired nodes are detached; a retry walks the live path.
        loop {
            match self.try_insert(&entry) {
                Ok(trimmed) => {
                    self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                    self.counters.trimmed.fetch_add(trimmed, Ordering::Relaxed);
                    self.counters
                        .insert_nanos
                        .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    return Ok(());
                }
                Err(Retired) => {
                    trace!(key = %entry.key(), sequence = entry.sequence, "insert raced a reap; retrying");
                }
            }
        }
    }

    fn try_insert(&self, entry: &LadEntry) -> Result<u64, Retired> {
        let key = entry.key();
        let mut node = self.root.child_for(key, &self.policy)?;
        loop {
            node = match node {
                Node::Branch(branch) => branch.child_for(key, &self.policy)?,
                Node::Leaf(leaf) => return leaf.append(entry.clone()),
            };
        }
    }

    /// Every stored entry accepted by `matcher`.
    pub fn get_all(&self, matcher: &dyn ContainerMatcher) -> LadResult {
        self.collect(matcher, None)
    }

    /// The `n` most recent entries per key accepted by `matcher`,
    /// ascending by sequence number.
    pub fn get(&self, matcher: &dyn ContainerMatcher, n: usize) -> LadResult {
        self.collect(matcher, Some(n))
    }

    fn collect(&self, matcher: &dyn ContainerMatcher, limit: Option<usize>) -> LadResult {
        let started = Instant::now();
        let mut out = LadResult::new();
        if limit != Some(0) {
            self.root
                .for_each_leaf(matcher, &mut |leaf: &LeafBuffer| {
                    leaf.collect(matcher, limit, &mut out)
                });
        }
        for entries in out.values_mut() {
            entries.sort_by_key(|e| e.sequence);
        }
        self.counters.query_done(started);
        out
    }

    /// Entries newer than the caller's per-key baseline, bucketed by
    /// completeness.
    pub fn delta_query(&self, matcher: &dyn ContainerMatcher, baseline: &DeltaBaseline) -> DeltaResult {
        let started = Instant::now();
        let mut out = DeltaResult::default();
        self.root
            .for_each_leaf(matcher, &mut |leaf: &LeafBuffer| {
                leaf.delta(matcher, baseline, &mut out)
            });
        out.sort();
        self.counters.query_done(started);
        out
    }

    /// Every stored entry, ascending by sequence number.
    pub fn entries(&self) -> Vec<LadEntry> {
        let mut all: Vec<LadEntry> = self
            .get_all(&LadQuery::all())
            .into_values()
            .flatten()
            .collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    /// Run one reap pass with `check_time_ms` as "now".
    pub fn reap(&self, settings: &ReapSettings, check_time_ms: i64) -> ReapReport {
        let started = Instant::now();
        let ctx = ReapContext {
            settings,
            policy: &self.policy,
            check_time_ms,
        };
        let mut report = ReapReport::default();
        self.root.reap(&ctx, false, None, &mut report);
        report.duration = started.elapsed();

        self.counters.reaps.fetch_add(1, Ordering::Relaxed);
        self.counters
            .trimmed
            .fetch_add(report.records_trimmed, Ordering::Relaxed);
        self.counters
            .evicted
            .fetch_add(report.records_evicted, Ordering::Relaxed);
        debug!(
            mode = ?settings,
            leaves_removed = report.leaves_removed,
            branches_removed = report.branches_removed,
            evicted = report.records_evicted,
            trimmed = report.records_trimmed,
            elapsed_us = report.duration.as_micros() as u64,
            "reap pass complete"
        );
        report
    }

    /// Detach every leaf on a path accepted by `matcher`, and any branch
    /// left empty. Record-level filters of the matcher are not consulted.
    /// Returns the number of records dropped.
    pub fn remove(&self, matcher: &dyn ContainerMatcher) -> usize {
        let mut removed = 0;
        self.root.remove(matcher, &mut removed);
        info!(records = removed, "removed matching containers");
        removed
    }

    /// Drop everything. Returns the number of records dropped.
    pub fn clear(&self) -> usize {
        let removed = self.root.clear();
        info!(records = removed, "container cleared");
        removed
    }

    /// Descend while the matcher constrains the next level and return the
    /// node reached. Ambiguous levels follow the first match.
    fn descend(&self, matcher: &dyn ContainerMatcher) -> Option<Node> {
        let mut node = Node::Branch(Arc::clone(&self.root));
        loop {
            let next = match &node {
                Node::Leaf(_) => return Some(node),
                Node::Branch(branch) => {
                    let level = branch.child_level();
                    if !matcher.constrains(level) {
                        return Some(node);
                    }
                    let mut matched = branch.matched_children(matcher);
                    if matched.len() > 1 {
                        warn!(%level, matches = matched.len(), "ambiguous match; using the first");
                    }
                    if matched.is_empty() {
                        return None;
                    }
                    matched.swap_remove(0).1
                }
            };
            node = next;
        }
    }

    /// Structure of the node selected by `matcher`.
    pub fn summary(&self, matcher: &dyn ContainerMatcher) -> Option<ContainerSummary> {
        self.descend(matcher).map(|node| node.summary())
    }

    /// Statistics of the node selected by `matcher`.
    pub fn metadata(&self, matcher: &dyn ContainerMatcher) -> Option<NodeMetadata> {
        self.descend(matcher).map(|node| node.metadata())
    }

    pub fn record_count(&self) -> usize {
        Node::Branch(Arc::clone(&self.root)).records()
    }

    pub fn stats(&self) -> ContainerStats {
        let tree = self.root.stats();
        let inserts = self.counters.inserts.load(Ordering::Relaxed);
        let queries = self.counters.queries.load(Ordering::Relaxed);
        ContainerStats {
            inserts,
            insert_failures: self.counters.insert_failures.load(Ordering::Relaxed),
            avg_insert_micros: average_micros(self.counters.insert_nanos.load(Ordering::Relaxed), inserts),
            queries,
            avg_query_micros: average_micros(self.counters.query_nanos.load(Ordering::Relaxed), queries),
            reaps: self.counters.reaps.load(Ordering::Relaxed),
            branches: tree.branches,
            leaves: tree.leaves,
            records: tree.records,
            records_trimmed: self.counters.trimmed.load(Ordering::Relaxed),
            records_evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for MasterContainer {
    fn default() -> Self {
        Self::new(ContainerPolicy::default())
    }
}
