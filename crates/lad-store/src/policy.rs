use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lad_types::{ContainerLevel, KeyComponent, TimeType};

/// Default number of records retained per key.
pub const DEFAULT_DATA_DEPTH: usize = 10;

/// Retention rules applied by the container.
///
/// Built once from configuration and shared by reference with every
/// container operation that needs it.
#[derive(Clone, Debug)]
pub struct ContainerPolicy {
    /// Records kept per key when no per-data-type depth is configured.
    pub default_depth: usize,
    /// Records kept per key, by user data type.
    pub depth_by_data_type: HashMap<u8, usize>,
    /// Time field compared against the reap cutoff.
    pub reap_time_type: TimeType,
    /// TTL applied to the whole hierarchy; `None` disables reaping except
    /// below nodes with an explicit override.
    pub default_ttl: Option<Duration>,
    /// TTLs for specific nodes, keyed by level and identifier text.
    pub ttl_overrides: HashMap<(ContainerLevel, String), Duration>,
}

impl Default for ContainerPolicy {
    fn default() -> Self {
        Self {
            default_depth: DEFAULT_DATA_DEPTH,
            depth_by_data_type: HashMap::new(),
            reap_time_type: TimeType::default(),
            default_ttl: None,
            ttl_overrides: HashMap::new(),
        }
    }
}

impl ContainerPolicy {
    pub fn with_default_depth(mut self, depth: usize) -> Self {
        self.default_depth = depth.max(1);
        self
    }

    pub fn with_depth(mut self, user_data_type: u8, depth: usize) -> Self {
        self.depth_by_data_type.insert(user_data_type, depth);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_ttl_override(
        mut self,
        level: ContainerLevel,
        identifier: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.ttl_overrides.insert((level, identifier.into()), ttl);
        self
    }

    pub fn with_reap_time_type(mut self, time_type: TimeType) -> Self {
        self.reap_time_type = time_type;
        self
    }

    /// Retention depth for a leaf holding the given user data type.
    pub fn depth_for(&self, user_data_type: u8) -> usize {
        match self.depth_by_data_type.get(&user_data_type) {
            Some(&depth) if depth > 0 => depth,
            _ => self.default_depth.max(1),
        }
    }

    /// The TTL configured on one node. The master level carries the default TTL.
    pub fn own_ttl(&self, level: ContainerLevel, identifier: Option<&KeyComponent>) -> Option<Duration> {
        match (level, identifier) {
            (ContainerLevel::Master, _) => self.default_ttl,
            (_, Some(id)) => self.ttl_overrides.get(&(level, id.to_string())).copied(),
            (_, None) => None,
        }
    }
}

/// Mode of one reap pass.
///
/// `Normal` is the periodic sweep; the other modes let an operator (or the
/// reaper under memory pressure) reclaim more aggressively.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode", content = "ratio")]
pub enum ReapSettings {
    #[default]
    Normal,
    /// Scale every effective TTL by the ratio (e.g. `0.5` halves retention).
    ReducedTtl(f64),
    /// Treat every node as reapable, inheriting the nearest TTL.
    IgnoreLevelRestrictions,
    /// Trim every leaf to `max(1, depth * ratio)` records, then reap normally.
    ReduceDepth(f64),
}

impl ReapSettings {
    pub(crate) fn forces_reapable(&self) -> bool {
        matches!(self, Self::IgnoreLevelRestrictions)
    }

    pub(crate) fn adjust_ttl(&self, ttl: Duration) -> Duration {
        match self {
            Self::ReducedTtl(ratio) => ttl.mul_f64(bounded_ratio(*ratio)),
            _ => ttl,
        }
    }

    pub(crate) fn reduced_depth(&self, depth: usize) -> Option<usize> {
        match self {
            Self::ReduceDepth(ratio) => {
                Some(((depth as f64 * bounded_ratio(*ratio)) as usize).max(1))
            }
            _ => None,
        }
    }
}

/// Ratios outside `[0, 1]` are clamped; NaN and infinities leave retention unchanged.
fn bounded_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Effective TTL of a node: the more restrictive of what it inherits and
/// what it configures itself.
pub fn effective_ttl(inherited: Option<Duration>, own: Option<Duration>) -> Option<Duration> {
    match (inherited, own) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
