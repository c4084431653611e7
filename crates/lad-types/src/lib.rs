//! Foundation types for the Global LAD (Latest Available Data) store.
//!
//! Every other LAD crate depends on `lad-types`. The types here describe what
//! a telemetry record *is*; how records are sequenced, stored, evicted and
//! backed up lives in the higher crates.
//!
//! # Key Types
//!
//! - [`TelemetryKey`]: composite key locating a record in the container hierarchy
//! - [`TimeFields`]: ERT / SCET / SCLK / LST / event time carried by a record
//! - [`TelemetryRecord`]: immutable record built through the factory functions
//! - [`RecordPayload`]: closed set of record variants (channel, event, packet)
//! - [`LadEntry`]: a record paired with its global insertion sequence number

pub mod error;
pub mod key;
pub mod record;
pub mod time;

pub use error::{TypeError, TypeResult};
pub use key::{ContainerLevel, KeyComponent, TelemetryKey};
pub use record::{
    ChannelSample, ChannelValue, DataKind, EventRecord, LadEntry, Origin, PacketSummary,
    RecordPayload, TelemetryRecord,
};
pub use time::{wall_clock_ms, Sclk, TimeFields, TimeType, Timestamp};
