//! Ingestion pipeline for the Global LAD.
//!
//! Producers publish records into a [`Sequencer`], which stamps each with a
//! global sequence number. A fixed [`InserterPool`] drains the ring and
//! files records into the container, one partition per thread. A [`Reaper`]
//! thread sweeps expired data on a timer.

pub mod error;
pub mod inserter;
pub mod reaper;
pub mod sequencer;
pub mod wait;

pub use error::{PipelineError, PipelineResult};
pub use inserter::{DiscardSink, InserterPool, InserterSink, InserterStats, StoreSink};
pub use reaper::{Reaper, ReaperConfig};
pub use sequencer::{Cursor, Sequencer, SequencerStats};
pub use wait::WaitStrategy;
