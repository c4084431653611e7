use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// One component of a [`TelemetryKey`], used as a child index at one level
/// of the container hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyComponent {
    Text(String),
    Number(u64),
}

impl KeyComponent {
    /// Parse a textual component: all-digit strings become numbers.
    pub fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => Self::Number(n),
            Err(_) => Self::Text(s.to_string()),
        }
    }
}

impl fmt::Display for KeyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for KeyComponent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeyComponent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for KeyComponent {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// Levels of the container hierarchy, root first.
///
/// `master → scid → venue → host → session → data_type → identifier`. The
/// identifier level holds the leaf buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerLevel {
    Master,
    Scid,
    Venue,
    Host,
    Session,
    DataType,
    Identifier,
}

impl ContainerLevel {
    /// Every level in descent order.
    pub const ALL: [ContainerLevel; 7] = [
        Self::Master,
        Self::Scid,
        Self::Venue,
        Self::Host,
        Self::Session,
        Self::DataType,
        Self::Identifier,
    ];

    /// The level directly below this one, `None` for leaves.
    pub fn child(self) -> Option<ContainerLevel> {
        match self {
            Self::Master => Some(Self::Scid),
            Self::Scid => Some(Self::Venue),
            Self::Venue => Some(Self::Host),
            Self::Host => Some(Self::Session),
            Self::Session => Some(Self::DataType),
            Self::DataType => Some(Self::Identifier),
            Self::Identifier => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        self == Self::Identifier
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Scid => "scid",
            Self::Venue => "venue",
            Self::Host => "host",
            Self::Session => "session",
            Self::DataType => "data_type",
            Self::Identifier => "identifier",
        }
    }
}

impl fmt::Display for ContainerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContainerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown container level: {s}"))
    }
}

/// Fully-qualified key of one leaf in the container.
///
/// `vcid` and `dss_id` are data-level attributes: they are part of the key
/// for identity and filtering but do not form container levels.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TelemetryKey {
    pub scid: u32,
    pub venue: String,
    pub host: String,
    pub session: u64,
    pub vcid: Option<u8>,
    pub dss_id: Option<u8>,
    pub user_data_type: u8,
    pub identifier: KeyComponent,
}

impl TelemetryKey {
    /// The component indexing this key at `level`; `None` for the master level.
    pub fn component(&self, level: ContainerLevel) -> Option<KeyComponent> {
        match level {
            ContainerLevel::Master => None,
            ContainerLevel::Scid => Some(KeyComponent::Number(u64::from(self.scid))),
            ContainerLevel::Venue => Some(KeyComponent::Text(self.venue.clone())),
            ContainerLevel::Host => Some(KeyComponent::Text(self.host.clone())),
            ContainerLevel::Session => Some(KeyComponent::Number(self.session)),
            ContainerLevel::DataType => Some(KeyComponent::Number(u64::from(self.user_data_type))),
            ContainerLevel::Identifier => Some(self.identifier.clone()),
        }
    }

    /// Deterministic partition index in `0..partitions`.
    ///
    /// Uses CRC32 over a canonical byte encoding of the key so the same key
    /// maps to the same partition in every process. Only the components that
    /// form container levels are hashed: every record landing in one leaf is
    /// routed to the same partition.
    pub fn partition(&self, partitions: usize) -> usize {
        if partitions <= 1 {
            return 0;
        }
        (self.stable_hash() as usize) % partitions
    }

    /// CRC32 of the canonical key encoding.
    pub fn stable_hash(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.scid.to_le_bytes());
        hasher.update(self.venue.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.host.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.session.to_le_bytes());
        hasher.update(&[self.user_data_type]);
        match &self.identifier {
            KeyComponent::Text(s) => {
                hasher.update(&[b't']);
                hasher.update(s.as_bytes());
            }
            KeyComponent::Number(n) => {
                hasher.update(&[b'n']);
                hasher.update(&n.to_le_bytes());
            }
        }
        hasher.finalize()
    }

    /// Reject keys with empty textual components.
    pub fn validate(&self) -> TypeResult<()> {
        if self.venue.is_empty() {
            return Err(TypeError::EmptyComponent { component: "venue" });
        }
        if self.host.is_empty() {
            return Err(TypeError::EmptyComponent { component: "host" });
        }
        if matches!(&self.identifier, KeyComponent::Text(s) if s.is_empty()) {
            return Err(TypeError::EmptyComponent {
                component: "identifier",
            });
        }
        Ok(())
    }
}

impl fmt::Display for TelemetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.scid, self.venue, self.host, self.session, self.user_data_type, self.identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(identifier: &str) -> TelemetryKey {
        TelemetryKey {
            scid: 76,
            venue: "TESTBED".into(),
            host: "gds-01".into(),
            session: 12,
            vcid: Some(0),
            dss_id: None,
            user_data_type: 0,
            identifier: identifier.into(),
        }
    }

    #[test]
    fn components_follow_levels() {
        let k = key("A-0001");
        assert_eq!(k.component(ContainerLevel::Master), None);
        assert_eq!(k.component(ContainerLevel::Scid), Some(KeyComponent::Number(76)));
        assert_eq!(k.component(ContainerLevel::Host), Some("gds-01".into()));
        assert_eq!(k.component(ContainerLevel::Identifier), Some("A-0001".into()));
    }

    #[test]
    fn levels_descend_to_identifier() {
        let mut level = ContainerLevel::Master;
        let mut depth = 0;
        while let Some(child) = level.child() {
            level = child;
            depth += 1;
        }
        assert_eq!(level, ContainerLevel::Identifier);
        assert!(level.is_leaf());
        assert_eq!(depth, ContainerLevel::ALL.len() - 1);
    }

    #[test]
    fn level_parses_by_name() {
        assert_eq!("data_type".parse::<ContainerLevel>(), Ok(ContainerLevel::DataType));
        assert_eq!("HOST".parse::<ContainerLevel>(), Ok(ContainerLevel::Host));
        assert!("channel".parse::<ContainerLevel>().is_err());
    }

    #[test]
    fn partition_uses_stable_hash() {
        let k = key("A-0001");
        assert_eq!(k.stable_hash(), key("A-0001").stable_hash());
        assert_ne!(k.stable_hash(), key("A-0002").stable_hash());
        assert_eq!(k.partition(1), 0);
        assert_eq!(k.partition(4), (k.stable_hash() as usize) % 4);
    }

    #[test]
    fn validate_rejects_empty_components() {
        let mut k = key("A-0001");
        assert!(k.validate().is_ok());
        k.host.clear();
        assert_eq!(
            k.validate(),
            Err(TypeError::EmptyComponent { component: "host" })
        );
        let k = key("");
        assert!(k.validate().is_err());
    }

    #[test]
    fn component_parse_prefers_numbers() {
        assert_eq!(KeyComponent::parse("42"), KeyComponent::Number(42));
        assert_eq!(KeyComponent::parse("A-42"), KeyComponent::Text("A-42".into()));
    }

    proptest! {
        #[test]
        fn partition_is_deterministic(id in "[A-Z]-[0-9]{4}", session in 0u64..1000, n in 1usize..16) {
            let mut a = key(&id);
            a.session = session;
            let b = a.clone();
            prop_assert!(a.partition(n) < n);
            prop_assert_eq!(a.partition(n), b.partition(n));
        }
    }
}
