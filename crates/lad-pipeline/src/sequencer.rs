use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::wait::WaitStrategy;

/// Snapshot of the sequencer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerStats {
    pub capacity: usize,
    /// Highest sequence number assigned so far, `0` before the first publish.
    pub last_sequence: u64,
    /// Slots a producer can fill before it has to wait.
    pub remaining_capacity: usize,
    /// Published items not yet committed by the slowest consumer.
    pub backlog: u64,
    pub consumers: usize,
    pub closed: bool,
}

struct RingState<T> {
    slots: Vec<Option<Arc<T>>>,
    /// Highest published sequence.
    published: u64,
    /// Committed position per consumer; `None` once the cursor is dropped.
    committed: Vec<Option<u64>>,
    closed: bool,
}

impl<T> RingState<T> {
    /// Position of the slowest live consumer, or `published` when there are none.
    fn gating(&self) -> u64 {
        self.committed
            .iter()
            .flatten()
            .copied()
            .min()
            .unwrap_or(self.published)
    }

    fn backlog(&self) -> u64 {
        self.published - self.gating()
    }
}

/// Bounded multi-producer, multi-consumer ring buffer that assigns every
/// published item a unique, strictly increasing sequence number.
///
/// Every consumer ([`Cursor`]) sees every item in sequence order. A slot is
/// reused only after all consumers committed past it, so producers wait
/// (per the [`WaitStrategy`]) while the slowest consumer is a full ring
/// behind. Sequence numbers start at 1.
pub struct Sequencer<T> {
    state: Mutex<RingState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    progress: Condvar,
    capacity: usize,
    mask: u64,
    wait: WaitStrategy,
}

impl<T: Send + Sync> Sequencer<T> {
    /// Create a sequencer with `capacity` slots, which must be a power of two.
    pub fn new(capacity: usize, wait: WaitStrategy) -> PipelineResult<Arc<Self>> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(PipelineError::InvalidCapacity { capacity });
        }
        debug!(capacity, ?wait, "sequencer created");
        Ok(Arc::new(Self {
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                published: 0,
                committed: Vec::new(),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            progress: Condvar::new(),
            capacity,
            mask: capacity as u64 - 1,
            wait,
        }))
    }

    /// Ring slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a consumer. It receives every item published after this call.
    ///
    /// Subscribe all consumers before publishing: a late subscriber does not
    /// see earlier items.
    pub fn subscribe(self: &Arc<Self>) -> Cursor<T> {
        let mut state = self.state.lock();
        let position = state.published;
        state.committed.push(Some(position));
        Cursor {
            sequencer: Arc::clone(self),
            id: state.committed.len() - 1,
            read: position,
        }
    }

    /// Publish one item, waiting for ring space if needed. Returns the
    /// sequence number assigned to it.
    pub fn publish(&self, item: T) -> PipelineResult<u64> {
        let item = Arc::new(item);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PipelineError::Closed);
            }
            if state.backlog() < self.capacity as u64 {
                break;
            }
            self.wait.wait(&self.not_full, &mut state);
        }
        let sequence = state.published + 1;
        state.slots[(sequence & self.mask) as usize] = Some(item);
        state.published = sequence;
        drop(state);
        self.not_empty.notify_all();
        Ok(sequence)
    }

    /// Stop accepting items and wake every waiting producer and consumer.
    /// Consumers still drain what was published before the close.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let published = state.published;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
        self.progress.notify_all();
        info!(last_sequence = published, "sequencer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Sequence number of the most recently published item; `0` before the first.
    pub fn last_sequence(&self) -> u64 {
        self.state.lock().published
    }

    /// Ring occupancy and consumer count.
    pub fn stats(&self) -> SequencerStats {
        let state = self.state.lock();
        let backlog = state.backlog();
        SequencerStats {
            capacity: self.capacity,
            last_sequence: state.published,
            remaining_capacity: self.capacity.saturating_sub(backlog as usize),
            backlog,
            consumers: state.committed.iter().flatten().count(),
            closed: state.closed,
        }
    }

    /// Wait until every consumer has committed `sequence`. Returns `false`
    /// on timeout.
    pub fn wait_for_consumers(&self, sequence: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.gating() >= sequence {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.wait.wait_until(&self.progress, &mut state, deadline);
        }
    }
}

/// A consumer's position in a [`Sequencer`].
///
/// Fetch with [`next_batch`](Self::next_batch), then [`commit`](Self::commit)
/// the last sequence handled so producers can reuse the slots.
pub struct Cursor<T> {
    sequencer: Arc<Sequencer<T>>,
    id: usize,
    read: u64,
}

impl<T: Send + Sync> Cursor<T> {
    /// Wait for and return up to `max` items following the last one read.
    ///
    /// Returns an empty batch only once the sequencer is closed and every
    /// published item has been read.
    pub fn next_batch(&mut self, max: usize) -> Vec<(u64, Arc<T>)> {
        let seq = &self.sequencer;
        let mut state = seq.state.lock();
        loop {
            if state.published > self.read {
                let end = state.published.min(self.read + max.max(1) as u64);
                let batch: Vec<(u64, Arc<T>)> = (self.read + 1..=end)
                    .filter_map(|s| {
                        state.slots[(s & seq.mask) as usize]
                            .as_ref()
                            .map(|item| (s, Arc::clone(item)))
                    })
                    .collect();
                self.read = end;
                return batch;
            }
            if state.closed {
                return Vec::new();
            }
            seq.wait.wait(&seq.not_empty, &mut state);
        }
    }

    /// Mark every item up to `sequence` as handled by this consumer.
    pub fn commit(&self, sequence: u64) {
        let seq = &self.sequencer;
        let mut state = seq.state.lock();
        if let Some(Some(position)) = state.committed.get_mut(self.id) {
            *position = (*position).max(sequence.min(self.read));
        }
        drop(state);
        seq.not_full.notify_all();
        seq.progress.notify_all();
    }

    /// Last sequence handed out by [`next_batch`](Self::next_batch).
    pub fn position(&self) -> u64 {
        self.read
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        let seq = &self.sequencer;
        let mut state = seq.state.lock();
        if let Some(slot) = state.committed.get_mut(self.id) {
            *slot = None;
        }
        drop(state);
        seq.not_full.notify_all();
        seq.progress.notify_all();
    }
}
