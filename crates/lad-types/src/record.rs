use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::key::{KeyComponent, TelemetryKey};
use crate::time::{TimeFields, TimeType};

/// Offset added to the default user data type of recorded (non-realtime) data.
pub const RECORDED_OFFSET: u8 = 16;

/// Classification of record payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    /// Engineering/health channel sample (EHA).
    Channel,
    /// Event record (EVR).
    Event,
    /// Frame or packet summary.
    Packet,
}

impl DataKind {
    /// Default user data type discriminator for this kind.
    pub fn user_data_type(self, recorded: bool) -> u8 {
        let base = match self {
            Self::Channel => 0,
            Self::Event => 1,
            Self::Packet => 2,
        };
        if recorded {
            base + RECORDED_OFFSET
        } else {
            base
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Channel => "channel",
            Self::Event => "event",
            Self::Packet => "packet",
        };
        write!(f, "{s}")
    }
}

/// Decoded value of a channel sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

/// One channel (EHA) sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    pub channel_id: String,
    /// Raw data number.
    pub dn: ChannelValue,
    /// Engineering-unit conversion, when the channel has one.
    pub eu: Option<f64>,
    pub alarm: Option<String>,
}

impl ChannelSample {
    pub fn new(channel_id: impl Into<String>, dn: ChannelValue) -> Self {
        Self {
            channel_id: channel_id.into(),
            dn,
            eu: None,
            alarm: None,
        }
    }
}

/// One event record (EVR).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: u64,
    pub name: String,
    pub level: String,
    pub message: String,
}

/// Summary of one received frame or packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketSummary {
    pub apid: u16,
    pub name: String,
    pub byte_length: u32,
    pub source_vcfc: Option<u32>,
}

/// Closed set of record variants the LAD stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    Channel(ChannelSample),
    Event(EventRecord),
    Packet(PacketSummary),
}

impl RecordPayload {
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Channel(_) => DataKind::Channel,
            Self::Event(_) => DataKind::Event,
            Self::Packet(_) => DataKind::Packet,
        }
    }

    /// The type-specific identifier: channel id, event id or APID.
    pub fn identifier(&self) -> KeyComponent {
        match self {
            Self::Channel(c) => KeyComponent::Text(c.channel_id.clone()),
            Self::Event(e) => KeyComponent::Number(e.event_id),
            Self::Packet(p) => KeyComponent::Number(u64::from(p.apid)),
        }
    }
}

/// Where a record came from: every key component except the identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub scid: u32,
    pub venue: String,
    pub host: String,
    pub session: u64,
    pub vcid: Option<u8>,
    pub dss_id: Option<u8>,
    /// Recorded (playback) data is kept apart from realtime data.
    pub recorded: bool,
}

impl Origin {
    pub fn new(scid: u32, venue: impl Into<String>, host: impl Into<String>, session: u64) -> Self {
        Self {
            scid,
            venue: venue.into(),
            host: host.into(),
            session,
            vcid: None,
            dss_id: None,
            recorded: false,
        }
    }

    pub fn with_vcid(mut self, vcid: u8) -> Self {
        self.vcid = Some(vcid);
        self
    }

    pub fn with_dss_id(mut self, dss_id: u8) -> Self {
        self.dss_id = Some(dss_id);
        self
    }

    pub fn recorded(mut self) -> Self {
        self.recorded = true;
        self
    }

    fn key_for(&self, payload: &RecordPayload) -> TelemetryKey {
        TelemetryKey {
            scid: self.scid,
            venue: self.venue.clone(),
            host: self.host.clone(),
            session: self.session,
            vcid: self.vcid,
            dss_id: self.dss_id,
            user_data_type: payload.kind().user_data_type(self.recorded),
            identifier: payload.identifier(),
        }
    }
}

/// An immutable unit of telemetry submitted to the LAD.
///
/// Built through the factory functions so that the key always agrees with
/// the payload. The global insertion sequence number is not part of the
/// record: it is assigned by the sequencer and carried by [`LadEntry`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub key: TelemetryKey,
    pub times: TimeFields,
    pub payload: RecordPayload,
}

impl TelemetryRecord {
    /// Factory dispatching on the payload variant.
    pub fn from_payload(origin: &Origin, times: TimeFields, payload: RecordPayload) -> Self {
        Self {
            key: origin.key_for(&payload),
            times,
            payload,
        }
    }

    pub fn channel(origin: &Origin, times: TimeFields, sample: ChannelSample) -> Self {
        Self::from_payload(origin, times, RecordPayload::Channel(sample))
    }

    pub fn event(origin: &Origin, times: TimeFields, event: EventRecord) -> Self {
        Self::from_payload(origin, times, RecordPayload::Event(event))
    }

    pub fn packet(origin: &Origin, times: TimeFields, packet: PacketSummary) -> Self {
        Self::from_payload(origin, times, RecordPayload::Packet(packet))
    }

    pub fn kind(&self) -> DataKind {
        self.payload.kind()
    }

    /// Milliseconds of the given time type, with the fallbacks of
    /// [`TimeFields::millis_for`].
    pub fn millis_for(&self, time_type: TimeType) -> i64 {
        self.times.millis_for(time_type)
    }

    /// Checks the invariants the store relies on.
    pub fn validate(&self) -> TypeResult<()> {
        self.key.validate()?;
        if !self.times.has_ordering_time() {
            return Err(TypeError::MissingOrderingTime);
        }
        let payload_id = self.payload.identifier();
        if payload_id != self.key.identifier {
            return Err(TypeError::IdentifierMismatch {
                key: self.key.identifier.to_string(),
                payload: payload_id.to_string(),
            });
        }
        Ok(())
    }
}

/// A stored record together with its global insertion sequence number.
///
/// Entries are cheap to clone: the record itself is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct LadEntry {
    pub sequence: u64,
    pub record: Arc<TelemetryRecord>,
}

impl LadEntry {
    pub fn new(sequence: u64, record: impl Into<Arc<TelemetryRecord>>) -> Self {
        Self {
            sequence,
            record: record.into(),
        }
    }

    pub fn key(&self) -> &TelemetryKey {
        &self.record.key
    }
}
