//! The Global LAD as one running service.
//!
//! [`GlobalLad::start`] builds the container, sequencer, inserter pool,
//! reaper and optional persister from a [`LadConfig`]. Producers call
//! `on_data`, readers query the container directly, and `shutdown` drains
//! the pipeline before stopping the background threads.

pub mod config;
pub mod error;
pub mod lad;
pub mod persister;

pub use config::{
    ContainerConfig, DepthOverride, InserterConfig, InserterMode, LadConfig, PersistenceConfig,
    ReapConfig, SequencerConfig, TtlOverride,
};
pub use error::{ServiceError, ServiceResult};
pub use lad::{GlobalLad, LadPublisher, LadStats, RestoreSummary};
pub use persister::Persister;
