//! Hierarchical in-memory container for the Global LAD.
//!
//! Records are filed under `master → scid → venue → host → session →
//! data type → identifier`. Each identifier owns a bounded leaf buffer of
//! its most recent records, ordered by global sequence number. The
//! [`MasterContainer`] supports concurrent insert, query, delta query,
//! removal and time-based reaping.

pub mod container;
pub mod delta;
pub mod error;
mod leaf;
pub mod matcher;
mod node;
pub mod policy;
pub mod query;
pub mod stats;

pub use container::MasterContainer;
pub use delta::{DeltaBaseline, DeltaResult, DeltaStatus, LadResult};
pub use error::{StoreError, StoreResult};
pub use matcher::{glob_match, ContainerMatcher, LadQuery};
pub use policy::{effective_ttl, ContainerPolicy, ReapSettings, DEFAULT_DATA_DEPTH};
pub use query::{result_to_json, EntryView, QueryEngine};
pub use stats::{
    BranchStats, ContainerStats, ContainerSummary, LeafStats, NodeMetadata, ReapReport, SummaryChild,
};
