use std::sync::Arc;

use serde::Serialize;

use lad_types::{DataKind, LadEntry, TelemetryRecord};

use crate::container::MasterContainer;
use crate::delta::{DeltaBaseline, DeltaResult, LadResult};
use crate::matcher::LadQuery;

/// Stateless read-side facade over a shared container.
///
/// Cheap to clone; every call copies its results out of the container.
#[derive(Clone)]
pub struct QueryEngine {
    container: Arc<MasterContainer>,
}

impl QueryEngine {
    pub fn new(container: Arc<MasterContainer>) -> Self {
        Self { container }
    }

    pub fn container(&self) -> &Arc<MasterContainer> {
        &self.container
    }

    pub fn get_all(&self, query: &LadQuery) -> LadResult {
        self.container.get_all(query)
    }

    /// At most `n` most recent entries per key.
    pub fn latest(&self, query: &LadQuery, n: usize) -> LadResult {
        self.container.get(query, n)
    }

    pub fn delta(&self, query: &LadQuery, baseline: &DeltaBaseline) -> DeltaResult {
        self.container.delta_query(query, baseline)
    }

    /// The single most recently sequenced entry across every matched key.
    pub fn latest_entry(&self, query: &LadQuery) -> Option<LadEntry> {
        self.container
            .get(query, 1)
            .into_values()
            .flatten()
            .max_by_key(|e| e.sequence)
    }

    /// Recent samples of one channel on one spacecraft.
    pub fn channel(&self, scid: u32, channel_id: &str, n: usize) -> LadResult {
        let query = LadQuery::all()
            .scid(scid)
            .kind(DataKind::Channel)
            .identifier(channel_id);
        self.latest(&query, n)
    }

    /// Recent occurrences of one event on one spacecraft.
    pub fn event(&self, scid: u32, event_id: u64, n: usize) -> LadResult {
        let query = LadQuery::all()
            .scid(scid)
            .kind(DataKind::Event)
            .identifier(event_id);
        self.latest(&query, n)
    }

    /// Everything recorded for one session on one host.
    pub fn session(&self, host: &str, session: u64) -> LadResult {
        self.get_all(&LadQuery::all().host(host).session(session))
    }
}

/// Serializable view of one entry.
#[derive(Debug, Serialize)]
pub struct EntryView<'a> {
    pub sequence: u64,
    pub record: &'a TelemetryRecord,
}

impl<'a> From<&'a LadEntry> for EntryView<'a> {
    fn from(entry: &'a LadEntry) -> Self {
        Self {
            sequence: entry.sequence,
            record: &entry.record,
        }
    }
}

/// Render a result as a JSON array of `{key, entries}` objects.
pub fn result_to_json(result: &LadResult) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = result
        .iter()
        .map(|(key, entries)| {
            let views: Vec<EntryView<'_>> = entries.iter().map(EntryView::from).collect();
            serde_json::json!({ "key": key, "entries": views })
        })
        .collect();
    serde_json::Value::Array(groups)
}
