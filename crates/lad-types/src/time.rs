use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Ground or spacecraft time with nanosecond precision.
///
/// Ordering: `millis` → `nanos`. The nanosecond part is the sub-millisecond
/// remainder and is always `< 1_000_000`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the UNIX epoch.
    pub millis: i64,
    /// Sub-millisecond nanoseconds.
    pub nanos: u32,
}

impl Timestamp {
    /// Create a timestamp with explicit values.
    pub fn new(millis: i64, nanos: u32) -> Self {
        Self {
            millis,
            nanos: nanos % 1_000_000,
        }
    }

    /// Create a timestamp at a whole millisecond.
    pub fn from_millis(millis: i64) -> Self {
        Self { millis, nanos: 0 }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_millis(wall_clock_ms() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms+{}ns)", self.millis, self.nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.millis, self.nanos)
    }
}

/// Spacecraft clock value: coarse seconds plus fine ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sclk {
    pub coarse: u64,
    pub fine: u32,
}

impl Sclk {
    pub fn new(coarse: u64, fine: u32) -> Self {
        Self { coarse, fine }
    }
}

impl fmt::Display for Sclk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:05}", self.coarse, self.fine)
    }
}

/// Which time field of a record a query or the reaper looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeType {
    /// Earth receive time.
    #[default]
    Ert,
    /// Spacecraft event time.
    Scet,
    /// Spacecraft clock.
    Sclk,
    /// Local solar time (shares the SCET millisecond base).
    Lst,
    /// Wall-clock time at which the record was created.
    Event,
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ert => "ert",
            Self::Scet => "scet",
            Self::Sclk => "sclk",
            Self::Lst => "lst",
            Self::Event => "event",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TimeType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ert" => Ok(Self::Ert),
            "scet" => Ok(Self::Scet),
            "sclk" => Ok(Self::Sclk),
            "lst" => Ok(Self::Lst),
            "event" => Ok(Self::Event),
            other => Err(TypeError::InvalidTimeType(other.to_string())),
        }
    }
}

/// The set of time representations carried by one record.
///
/// At least one of ERT, SCET, SCLK or LST must be present for a record to be
/// accepted by the store. `event_time_ms` is always set: it is the wall-clock
/// time at which the record was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeFields {
    pub ert: Option<Timestamp>,
    pub scet: Option<Timestamp>,
    pub sclk: Option<Sclk>,
    pub lst: Option<Timestamp>,
    pub event_time_ms: u64,
}

impl TimeFields {
    /// Time fields stamped with the current wall-clock event time and nothing else.
    pub fn now() -> Self {
        Self {
            ert: None,
            scet: None,
            sclk: None,
            lst: None,
            event_time_ms: wall_clock_ms(),
        }
    }

    /// Convenience constructor for a record received at `ert`.
    pub fn at_ert(ert: Timestamp) -> Self {
        Self {
            ert: Some(ert),
            ..Self::now()
        }
    }

    pub fn with_ert(mut self, ert: Timestamp) -> Self {
        self.ert = Some(ert);
        self
    }

    pub fn with_scet(mut self, scet: Timestamp) -> Self {
        self.scet = Some(scet);
        self
    }

    pub fn with_sclk(mut self, sclk: Sclk) -> Self {
        self.sclk = Some(sclk);
        self
    }

    pub fn with_lst(mut self, lst: Timestamp) -> Self {
        self.lst = Some(lst);
        self
    }

    /// Returns `true` if at least one spacecraft/ground time is present.
    pub fn has_ordering_time(&self) -> bool {
        self.ert.is_some() || self.scet.is_some() || self.sclk.is_some() || self.lst.is_some()
    }

    /// The timestamp for the requested time type, if the record carries it.
    ///
    /// SCLK is reported as coarse seconds converted to milliseconds.
    pub fn timestamp_for(&self, time_type: TimeType) -> Option<Timestamp> {
        match time_type {
            TimeType::Ert => self.ert,
            TimeType::Scet => self.scet,
            TimeType::Lst => self.lst.or(self.scet),
            TimeType::Sclk => self
                .sclk
                .map(|s| Timestamp::from_millis((s.coarse as i64).saturating_mul(1_000))),
            TimeType::Event => Some(Timestamp::from_millis(self.event_time_ms as i64)),
        }
    }

    /// Milliseconds used for time-based eviction and time-box queries.
    ///
    /// Falls back to the first present of ERT, SCET, LST and finally the
    /// event time when the requested field is absent.
    pub fn millis_for(&self, time_type: TimeType) -> i64 {
        self.timestamp_for(time_type)
            .or(self.ert)
            .or(self.scet)
            .or(self.lst)
            .map(|t| t.millis)
            .unwrap_or(self.event_time_ms as i64)
    }
}

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
