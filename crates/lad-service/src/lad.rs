use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lad_backup::{read_backup, write_snapshot, BackupRotation, SnapshotInfo};
use lad_pipeline::{
    DiscardSink, InserterPool, InserterSink, InserterStats, Reaper, Sequencer, StoreSink,
};
use lad_store::{
    ContainerMatcher, ContainerStats, ContainerSummary, DeltaBaseline, DeltaResult, LadResult,
    MasterContainer, NodeMetadata, QueryEngine, ReapReport, ReapSettings,
};
use lad_types::{wall_clock_ms, TelemetryRecord};

use crate::config::{InserterMode, LadConfig};
use crate::error::ServiceResult;
use crate::persister::Persister;

/// Runtime statistics of a LAD instance, rendered as camelCase JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LadStats {
    pub uptime_millis: u64,
    pub last_sequence: u64,
    pub ring_buffer_size: usize,
    pub remaining_capacity: usize,
    pub backlog: u64,
    pub inserters: Vec<InserterStats>,
    pub container: ContainerStats,
}

/// Outcome of loading a backup. Problems are reported here, never raised.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub path: PathBuf,
    /// Records dropped by the clear that preceded the restore.
    pub cleared: usize,
    /// Records republished into the pipeline.
    pub restored: u64,
    pub skipped: u64,
    pub truncated: bool,
    pub error: Option<String>,
}

/// Cheap, cloneable handle for producer threads.
#[derive(Clone)]
pub struct LadPublisher {
    sequencer: Arc<Sequencer<TelemetryRecord>>,
}

impl LadPublisher {
    /// Publish one record; blocks while the ring is full. Returns the
    /// record's sequence number, or `Closed` once the LAD shuts down.
    pub fn on_data(&self, record: TelemetryRecord) -> ServiceResult<u64> {
        Ok(self.sequencer.publish(record)?)
    }
}

/// One Global LAD instance: sequencer, inserter pool, container, reaper
/// and optional persister, wired from a [`LadConfig`].
pub struct GlobalLad {
    config: Arc<LadConfig>,
    container: Arc<MasterContainer>,
    queries: QueryEngine,
    sequencer: Arc<Sequencer<TelemetryRecord>>,
    inserters: InserterPool,
    reaper: Option<Reaper>,
    persister: Option<Persister>,
    started: Instant,
}

impl GlobalLad {
    pub fn start(config: Arc<LadConfig>) -> ServiceResult<Self> {
        config.validate()?;

        let container = Arc::new(MasterContainer::new(config.to_policy()));
        let sequencer = Sequencer::new(
            config.sequencer.ring_buffer_size,
            config.sequencer.wait_strategy,
        )?;
        let sink: Arc<dyn InserterSink> = match config.inserters.mode {
            InserterMode::Store => Arc::new(StoreSink::new(Arc::clone(&container))),
            InserterMode::Discard => Arc::new(DiscardSink),
        };
        let inserters = InserterPool::start(&sequencer, sink, config.inserters.count)?;

        let reaper = if config.reap.enabled {
            Some(Reaper::start(Arc::clone(&container), config.reaper_config())?)
        } else {
            None
        };

        let mut lad = Self {
            queries: QueryEngine::new(Arc::clone(&container)),
            config: Arc::clone(&config),
            container,
            sequencer,
            inserters,
            reaper,
            persister: None,
            started: Instant::now(),
        };

        let persistence = &config.persistence;
        if persistence.enabled {
            let rotation = lad.rotation();
            if persistence.restore_on_start {
                match rotation.latest() {
                    Ok(Some(path)) => {
                        lad.initialize_from_backup(&path, false);
                    }
                    Ok(None) => debug!("no backup to restore"),
                    Err(e) => warn!(error = %e, "cannot list backups"),
                }
            }
            lad.persister = Some(Persister::start(
                Arc::clone(&lad.container),
                rotation,
                Duration::from_secs(persistence.interval_secs),
            )?);
        }

        info!(
            ring_buffer_size = config.sequencer.ring_buffer_size,
            inserters = config.inserters.count,
            wait = ?config.sequencer.wait_strategy,
            "global LAD started"
        );
        Ok(lad)
    }

    pub fn config(&self) -> &LadConfig {
        &self.config
    }

    /// The rotated backup set configured under `[persistence]`.
    pub fn rotation(&self) -> BackupRotation {
        let p = &self.config.persistence;
        BackupRotation::new(p.directory.clone(), p.basename.clone(), p.max_backups)
    }

    pub fn publisher(&self) -> LadPublisher {
        LadPublisher {
            sequencer: Arc::clone(&self.sequencer),
        }
    }

    /// Accept one record from a producer. See [`LadPublisher::on_data`].
    pub fn on_data(&self, record: TelemetryRecord) -> ServiceResult<u64> {
        Ok(self.sequencer.publish(record)?)
    }

    /// Wait until every record published so far has been applied.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.sequencer
            .wait_for_consumers(self.sequencer.last_sequence(), timeout)
    }

    pub fn query_engine(&self) -> &QueryEngine {
        &self.queries
    }

    pub fn container(&self) -> &Arc<MasterContainer> {
        &self.container
    }

    /// Every stored record accepted by `matcher`, grouped by key.
    pub fn get_all(&self, matcher: &dyn ContainerMatcher) -> LadResult {
        self.container.get_all(matcher)
    }

    /// The `n` most recent matching records of each key, oldest first.
    pub fn get(&self, matcher: &dyn ContainerMatcher, n: usize) -> LadResult {
        self.container.get(matcher, n)
    }

    /// Records newer than `baseline`, bucketed by completeness.
    pub fn delta_query(&self, matcher: &dyn ContainerMatcher, baseline: &DeltaBaseline) -> DeltaResult {
        self.container.delta_query(matcher, baseline)
    }

    /// Child counts at the deepest level `matcher` pins down.
    pub fn summary(&self, matcher: &dyn ContainerMatcher) -> Option<ContainerSummary> {
        self.container.summary(matcher)
    }

    /// Statistics of the single node `matcher` pins down.
    pub fn metadata(&self, matcher: &dyn ContainerMatcher) -> Option<NodeMetadata> {
        self.container.metadata(matcher)
    }

    /// Detach matching subtrees. Returns the number of records dropped.
    pub fn remove(&self, matcher: &dyn ContainerMatcher) -> usize {
        self.container.remove(matcher)
    }

    /// Drop every record. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.container.clear()
    }

    /// Run one reap pass now, outside the reaper schedule.
    pub fn reap_now(&self, settings: &ReapSettings) -> ReapReport {
        self.container.reap(settings, wall_clock_ms() as i64)
    }

    pub fn stats(&self) -> LadStats {
        let ring = self.sequencer.stats();
        LadStats {
            uptime_millis: self.started.elapsed().as_millis() as u64,
            last_sequence: ring.last_sequence,
            ring_buffer_size: ring.capacity,
            remaining_capacity: ring.remaining_capacity,
            backlog: ring.backlog,
            inserters: self.inserters.stats(),
            container: self.container.stats(),
        }
    }

    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::to_value(self.stats()).unwrap_or(serde_json::Value::Null)
    }

    /// Replay a backup file through the live insertion path.
    ///
    /// Restored records get fresh sequence numbers. A missing, foreign or
    /// damaged file is logged and reported in the summary; whatever could
    /// be read is kept.
    pub fn initialize_from_backup(&self, path: &Path, clear: bool) -> RestoreSummary {
        let mut summary = RestoreSummary {
            path: path.to_path_buf(),
            ..RestoreSummary::default()
        };
        if clear {
            summary.cleared = self.clear();
        }

        let mut stream = match read_backup(path) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot restore from backup");
                summary.error = Some(e.to_string());
                return summary;
            }
        };
        for frame in stream.by_ref() {
            match self.on_data(frame.record) {
                Ok(_) => summary.restored += 1,
                Err(e) => {
                    warn!(error = %e, "restore interrupted");
                    summary.error = Some(e.to_string());
                    break;
                }
            }
        }
        summary.skipped = stream.skipped();
        summary.truncated = stream.truncated();

        info!(
            path = %path.display(),
            restored = summary.restored,
            skipped = summary.skipped,
            truncated = summary.truncated,
            "restored from backup"
        );
        summary
    }

    /// Write every record currently held to `path`.
    pub fn snapshot(&self, path: &Path) -> ServiceResult<SnapshotInfo> {
        Ok(write_snapshot(path, &self.container.entries())?)
    }

    /// Stop accepting records, drain the inserters, then stop the reaper
    /// and the persister. Publishers blocked on a full ring are released
    /// with `Closed`.
    pub fn shutdown(self) -> LadStats {
        let Self {
            container,
            sequencer,
            inserters,
            reaper,
            persister,
            started,
            ..
        } = self;

        sequencer.close();
        let inserter_stats = inserters.join();
        if let Some(reaper) = reaper {
            reaper.stop();
        }
        if let Some(persister) = persister {
            if let Some(info) = persister.stop() {
                info!(path = %info.path.display(), frames = info.frames, "final snapshot written");
            }
        }

        let ring = sequencer.stats();
        let stats = LadStats {
            uptime_millis: started.elapsed().as_millis() as u64,
            last_sequence: ring.last_sequence,
            ring_buffer_size: ring.capacity,
            remaining_capacity: ring.remaining_capacity,
            backlog: ring.backlog,
            inserters: inserter_stats,
            container: container.stats(),
        };
        info!(last_sequence = stats.last_sequence, records = stats.container.records, "global LAD stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use lad_store::{DeltaStatus, LadQuery};
    use lad_types::{ChannelSample, ChannelValue, Origin, TimeFields, Timestamp};
    use std::fs;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(10);

    fn record(channel: &str, value: u64) -> TelemetryRecord {
        TelemetryRecord::channel(
            &Origin::new(76, "FLIGHT", "gds-01", 1),
            TimeFields::at_ert(Timestamp::from_millis(value as i64)),
            ChannelSample::new(channel, ChannelValue::Unsigned(value)),
        )
    }

    fn quiet_config() -> LadConfig {
        let mut config = LadConfig::default();
        config.reap.enabled = false;
        config
    }

    fn start(config: LadConfig) -> GlobalLad {
        GlobalLad::start(Arc::new(config)).unwrap()
    }

    fn records_of(result: &LadResult) -> Vec<TelemetryRecord> {
        result
            .values()
            .flatten()
            .map(|e| TelemetryRecord::clone(&e.record))
            .collect()
    }

    #[test]
    fn ingest_and_query() {
        let lad = start(quiet_config());
        for i in 1..=40u64 {
            let channel = if i % 2 == 0 { "A-0002" } else { "A-0001" };
            assert_eq!(lad.on_data(record(channel, i)).unwrap(), i);
        }
        assert!(lad.flush(WAIT));

        let all = lad.get_all(&LadQuery::all());
        assert_eq!(all.len(), 2);
        assert!(all.values().all(|v| v.len() == 10));

        let latest = lad.get(&LadQuery::all().identifier("A-0002"), 1);
        let seqs: Vec<u64> = latest.values().flatten().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![40]);

        let delta = lad.delta_query(&LadQuery::all(), &DeltaBaseline::since(38));
        assert_eq!(delta.total_records(), 2);
        assert!(delta.get(DeltaStatus::Complete).is_some());
        let stale = lad.delta_query(&LadQuery::all(), &DeltaBaseline::since(5));
        assert!(stale.get(DeltaStatus::Incomplete).is_some());

        let stats = lad.shutdown();
        assert_eq!(stats.last_sequence, 40);
        assert_eq!(stats.inserters.iter().map(|s| s.applied).sum::<u64>(), 40);
    }

    #[test]
    fn stats_are_camel_case_json() {
        let lad = start(quiet_config());
        lad.on_data(record("A-0001", 1)).unwrap();
        assert!(lad.flush(WAIT));
        let json = lad.stats_json();
        for field in ["uptimeMillis", "lastSequence", "ringBufferSize", "remainingCapacity", "backlog"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["ringBufferSize"], 1024);
        assert_eq!(json["lastSequence"], 1);
        assert_eq!(json["backlog"], 0);
        lad.shutdown();
    }

    #[test]
    fn backup_restore_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.glad");

        let source = start(quiet_config());
        for i in 1..=30u64 {
            source.on_data(record(&format!("A-{:04}", i % 3), i)).unwrap();
        }
        assert!(source.flush(WAIT));
        let expected = records_of(&source.get_all(&LadQuery::all()));
        assert_eq!(source.snapshot(&path).unwrap().frames, expected.len() as u64);
        source.shutdown();

        let target = start(quiet_config());
        let summary = target.initialize_from_backup(&path, true);
        assert_eq!(summary.restored, expected.len() as u64);
        assert!(summary.error.is_none());
        assert!(target.flush(WAIT));
        assert_eq!(records_of(&target.get_all(&LadQuery::all())), expected);

        // Restoring the same file again over a clear changes nothing.
        let again = target.initialize_from_backup(&path, true);
        assert_eq!(again.cleared, expected.len());
        assert!(target.flush(WAIT));
        assert_eq!(records_of(&target.get_all(&LadQuery::all())), expected);
        target.shutdown();
    }

    #[test]
    fn bad_backups_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.glad");
        fs::write(&garbage, b"this is not a backup").unwrap();

        let lad = start(quiet_config());
        lad.on_data(record("A-0001", 1)).unwrap();
        assert!(lad.flush(WAIT));

        let missing = lad.initialize_from_backup(&dir.path().join("missing.glad"), false);
        assert!(missing.error.is_some());
        let foreign = lad.initialize_from_backup(&garbage, false);
        assert!(foreign.error.is_some());
        assert_eq!(foreign.restored, 0);

        // The instance keeps working and kept its data.
        assert_eq!(lad.container().record_count(), 1);
        lad.on_data(record("A-0001", 2)).unwrap();
        assert!(lad.flush(WAIT));
        assert_eq!(lad.container().record_count(), 2);
        lad.shutdown();
    }

    #[test]
    fn shutdown_releases_publishers() {
        let mut config = quiet_config();
        config.sequencer.ring_buffer_size = 4;
        let lad = start(config);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let publisher = lad.publisher();
                thread::spawn(move || {
                    let mut published = 0u64;
                    while publisher.on_data(record(&format!("P-{p}"), published)).is_ok() {
                        published += 1;
                    }
                    published
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let stats = lad.shutdown();
        let published: u64 = producers.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(published, stats.last_sequence);
        assert_eq!(stats.inserters.iter().map(|s| s.applied).sum::<u64>(), published);
    }

    #[test]
    fn remove_and_clear() {
        let lad = start(quiet_config());
        for i in 1..=6u64 {
            let channel = if i <= 3 { "A-0001" } else { "B-0001" };
            lad.on_data(record(channel, i)).unwrap();
        }
        assert!(lad.flush(WAIT));
        assert_eq!(lad.remove(&LadQuery::all().identifier("A-0001")), 3);
        assert_eq!(lad.clear(), 3);
        assert!(lad.get_all(&LadQuery::all()).is_empty());
        lad.shutdown();
    }

    #[test]
    fn persistence_restores_on_next_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = quiet_config();
        config.persistence = PersistenceConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            interval_secs: 3_600,
            restore_on_start: true,
            ..PersistenceConfig::default()
        };

        let first = start(config.clone());
        for i in 1..=5u64 {
            first.on_data(record("A-0001", i)).unwrap();
        }
        first.shutdown();
        assert_eq!(first_rotation_len(&config), 1);

        let second = start(config);
        assert!(second.flush(WAIT));
        assert_eq!(second.container().record_count(), 5);
        second.shutdown();
    }

    fn first_rotation_len(config: &LadConfig) -> usize {
        let p = &config.persistence;
        BackupRotation::new(p.directory.clone(), p.basename.clone(), p.max_backups)
            .list()
            .unwrap()
            .len()
    }
}
