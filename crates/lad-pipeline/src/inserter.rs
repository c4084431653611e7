use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lad_store::MasterContainer;
use lad_types::{LadEntry, TelemetryRecord};

use crate::error::{PipelineError, PipelineResult};
use crate::sequencer::{Cursor, Sequencer};

/// Items fetched from the ring per wake-up.
const BATCH_SIZE: usize = 256;

/// Destination of sequenced records.
pub trait InserterSink: Send + Sync + 'static {
    fn apply(&self, entry: LadEntry) -> PipelineResult<()>;
}

/// Inserts into the shared container.
pub struct StoreSink {
    container: Arc<MasterContainer>,
}

impl StoreSink {
    pub fn new(container: Arc<MasterContainer>) -> Self {
        Self { container }
    }
}

impl InserterSink for StoreSink {
    fn apply(&self, entry: LadEntry) -> PipelineResult<()> {
        Ok(self.container.insert(entry)?)
    }
}

/// Drops every record. Measures the pipeline without the store.
#[derive(Default)]
pub struct DiscardSink;

impl InserterSink for DiscardSink {
    fn apply(&self, _entry: LadEntry) -> PipelineResult<()> {
        Ok(())
    }
}

/// Counters of one inserter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InserterStats {
    pub partition: usize,
    /// Last sequence this inserter has consumed, whether or not it applied it.
    pub last_sequence: u64,
    pub applied: u64,
    pub failed: u64,
}

#[derive(Default)]
struct InserterCounters {
    last_sequence: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

/// Fixed pool of inserter threads sharing one sequencer.
///
/// Every inserter consumes the whole stream but applies only the records
/// whose key hashes to its partition, so all records for one key are
/// applied by one thread in sequence order.
pub struct InserterPool {
    handles: Vec<JoinHandle<()>>,
    counters: Vec<Arc<InserterCounters>>,
}

impl InserterPool {
    /// Subscribe `size` cursors and start one thread per partition.
    pub fn start(
        sequencer: &Arc<Sequencer<TelemetryRecord>>,
        sink: Arc<dyn InserterSink>,
        size: usize,
    ) -> PipelineResult<Self> {
        if size == 0 {
            return Err(PipelineError::NoInserters);
        }

        // All cursors exist before any thread runs so none misses an item.
        let cursors: Vec<Cursor<TelemetryRecord>> =
            (0..size).map(|_| sequencer.subscribe()).collect();

        let mut handles = Vec::with_capacity(size);
        let mut counters = Vec::with_capacity(size);
        for (partition, cursor) in cursors.into_iter().enumerate() {
            let stats = Arc::new(InserterCounters::default());
            let sink = Arc::clone(&sink);
            let thread_stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("lad-inserter-{partition}"))
                .spawn(move || run_inserter(partition, size, cursor, sink, thread_stats))?;
            handles.push(handle);
            counters.push(stats);
        }

        info!(inserters = size, "inserter pool started");
        Ok(Self { handles, counters })
    }

    pub fn size(&self) -> usize {
        self.counters.len()
    }

    pub fn stats(&self) -> Vec<InserterStats> {
        snapshot(&self.counters)
    }

    /// Wait for every inserter to drain the closed sequencer and exit.
    ///
    /// Returns the final stats. Close the sequencer first or this blocks.
    pub fn join(self) -> Vec<InserterStats> {
        let Self { handles, counters } = self;
        for handle in handles {
            let name = handle.thread().name().unwrap_or("lad-inserter").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "inserter thread panicked");
            }
        }
        let stats = snapshot(&counters);
        debug!(?stats, "inserter pool joined");
        stats
    }
}

fn snapshot(counters: &[Arc<InserterCounters>]) -> Vec<InserterStats> {
    counters
        .iter()
        .enumerate()
        .map(|(partition, c)| InserterStats {
            partition,
            last_sequence: c.last_sequence.load(Ordering::Acquire),
            applied: c.applied.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        })
        .collect()
}

fn run_inserter(
    partition: usize,
    partitions: usize,
    mut cursor: Cursor<TelemetryRecord>,
    sink: Arc<dyn InserterSink>,
    counters: Arc<InserterCounters>,
) {
    debug!(partition, "inserter running");
    loop {
        let batch = cursor.next_batch(BATCH_SIZE);
        let Some(last) = batch.last().map(|(sequence, _)| *sequence) else {
            break;
        };
        for (sequence, record) in batch {
            if record.key.partition(partitions) != partition {
                continue;
            }
            match sink.apply(LadEntry::new(sequence, record)) {
                Ok(()) => {
                    counters.applied.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(partition, sequence, error = %e, "dropping record the store rejected");
                }
            }
        }
        counters.last_sequence.store(last, Ordering::Release);
        cursor.commit(last);
    }
    debug!(partition, "inserter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::WaitStrategy;
    use lad_store::LadQuery;
    use lad_types::{ChannelSample, ChannelValue, Origin, TimeFields, Timestamp};
    use std::time::Duration;

    fn record(channel: &str, value: u64) -> TelemetryRecord {
        TelemetryRecord::channel(
            &Origin::new(76, "FLIGHT", "gds-01", 1),
            TimeFields::at_ert(Timestamp::from_millis(value as i64)),
            ChannelSample::new(channel, ChannelValue::Unsigned(value)),
        )
    }

    #[test]
    fn zero_inserters_rejected() {
        let seq = Sequencer::new(8, WaitStrategy::Block).unwrap();
        assert!(matches!(
            InserterPool::start(&seq, Arc::new(DiscardSink), 0),
            Err(PipelineError::NoInserters)
        ));
    }

    #[test]
    fn records_flow_into_the_store() {
        let container = Arc::new(MasterContainer::default());
        let seq = Sequencer::new(1024, WaitStrategy::Block).unwrap();
        let pool = InserterPool::start(&seq, Arc::new(StoreSink::new(Arc::clone(&container))), 2).unwrap();

        let channels = ["A-0001", "A-0002", "A-0003", "A-0004"];
        for i in 0..1_000u64 {
            seq.publish(record(channels[(i % 4) as usize], i)).unwrap();
        }
        assert!(seq.wait_for_consumers(1_000, Duration::from_secs(10)));
        seq.close();
        let stats = pool.join();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats.iter().map(|s| s.last_sequence).max(), Some(1_000));
        assert_eq!(stats.iter().map(|s| s.applied).sum::<u64>(), 1_000);
        assert_eq!(stats.iter().map(|s| s.failed).sum::<u64>(), 0);

        // Default depth keeps the newest ten per channel.
        let result = container.get_all(&LadQuery::all());
        assert_eq!(result.len(), 4);
        for entries in result.values() {
            assert_eq!(entries.len(), 10);
            assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
        }
        let a1 = container.get_all(&LadQuery::all().identifier("A-0001"));
        let last: Vec<u64> = a1.values().flatten().map(|e| e.sequence).collect();
        assert_eq!(last.last(), Some(&997));
    }

    #[test]
    fn rejected_records_are_counted_not_fatal() {
        let container = Arc::new(MasterContainer::default());
        let seq = Sequencer::new(16, WaitStrategy::Block).unwrap();
        let pool = InserterPool::start(&seq, Arc::new(StoreSink::new(Arc::clone(&container))), 1).unwrap();

        let mut bad = record("A-0001", 1);
        bad.times = TimeFields::now();
        seq.publish(bad).unwrap();
        seq.publish(record("A-0001", 2)).unwrap();
        seq.close();
        let stats = pool.join();
        assert_eq!(stats[0].failed, 1);
        assert_eq!(stats[0].applied, 1);
        assert_eq!(container.record_count(), 1);
    }

    #[test]
    fn discard_sink_consumes_everything() {
        let seq = Sequencer::new(64, WaitStrategy::Yield).unwrap();
        let pool = InserterPool::start(&seq, Arc::new(DiscardSink), 3).unwrap();
        for i in 0..500u64 {
            seq.publish(record("A-0001", i)).unwrap();
        }
        seq.close();
        let stats = pool.join();
        assert!(stats.iter().all(|s| s.last_sequence == 500));
        assert_eq!(stats.iter().map(|s| s.applied).sum::<u64>(), 500);
    }
}
