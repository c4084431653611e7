use std::time::Duration;

use serde::{Deserialize, Serialize};

use lad_types::ContainerLevel;

/// Counters of one leaf buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafStats {
    pub identifier: String,
    pub depth: usize,
    pub records: usize,
    pub inserted: u64,
    /// Records dropped because the leaf was over depth.
    pub trimmed: u64,
    /// Records removed by the reaper.
    pub evicted: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub last_dropped_sequence: Option<u64>,
}

/// Aggregate counters of one branch and its subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStats {
    pub level: Option<ContainerLevel>,
    pub identifier: Option<String>,
    pub children: usize,
    pub branches: usize,
    pub leaves: usize,
    pub records: usize,
}

/// Statistics of a matched node, as returned by a metadata request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeMetadata {
    Branch(BranchStats),
    Leaf(LeafStats),
}

/// One child listed by a summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryChild {
    pub level: ContainerLevel,
    pub identifier: String,
    pub records: usize,
}

/// Structural summary of a matched node: its identity and direct children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub level: ContainerLevel,
    pub identifier: Option<String>,
    pub records: usize,
    pub children: Vec<SummaryChild>,
}

/// Whole-container statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub inserts: u64,
    pub insert_failures: u64,
    pub avg_insert_micros: f64,
    pub queries: u64,
    pub avg_query_micros: f64,
    pub reaps: u64,
    pub branches: usize,
    pub leaves: usize,
    pub records: usize,
    pub records_trimmed: u64,
    pub records_evicted: u64,
}

/// Outcome of one reap pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub leaves_removed: usize,
    pub branches_removed: usize,
    pub records_evicted: u64,
    pub records_trimmed: u64,
    pub duration: Duration,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.leaves_removed == 0
            && self.branches_removed == 0
            && self.records_evicted == 0
            && self.records_trimmed == 0
    }
}
