use lad_store::StoreError;
use lad_types::TimeType;

/// Errors from the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Ring buffer sizes must be non-zero powers of two.
    #[error("ring buffer capacity {capacity} is not a power of two")]
    InvalidCapacity { capacity: usize },

    #[error("inserter pool needs at least one inserter")]
    NoInserters,

    /// The sequencer was shut down; the item was not published.
    #[error("sequencer is closed")]
    Closed,

    /// The reaper measures record age against the wall clock, which this
    /// time type does not share a base with.
    #[error("records cannot be reaped by {0} time")]
    UnsupportedReapTimeType(TimeType),

    #[error("store rejected entry: {0}")]
    Store(#[from] StoreError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
