use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lad_pipeline::{ReaperConfig, WaitStrategy};
use lad_store::{ContainerPolicy, ReapSettings, DEFAULT_DATA_DEPTH};
use lad_types::{ContainerLevel, TimeType};

use crate::error::{ServiceError, ServiceResult};

/// Configuration of one Global LAD instance.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadConfig {
    pub sequencer: SequencerConfig,
    pub inserters: InserterConfig,
    pub container: ContainerConfig,
    pub reap: ReapConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Ring slots; must be a power of two.
    pub ring_buffer_size: usize,
    pub wait_strategy: WaitStrategy,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 1024,
            wait_strategy: WaitStrategy::Block,
        }
    }
}

/// What the inserters do with the records they own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InserterMode {
    #[default]
    Store,
    /// Consume and drop. For measuring the pipeline alone.
    Discard,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InserterConfig {
    pub count: usize,
    pub mode: InserterMode,
}

impl Default for InserterConfig {
    fn default() -> Self {
        Self {
            count: 2,
            mode: InserterMode::Store,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthOverride {
    pub user_data_type: u8,
    pub depth: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Records kept per key.
    pub default_depth: usize,
    pub depth_overrides: Vec<DepthOverride>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            default_depth: DEFAULT_DATA_DEPTH,
            depth_overrides: Vec::new(),
        }
    }
}

/// TTL for one node of the hierarchy, e.g. `{ level = "host", identifier = "gds-01", ttl_secs = 60 }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlOverride {
    pub level: ContainerLevel,
    pub identifier: String,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReapConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// TTL for the whole container. Without it only overridden nodes age out.
    pub default_ttl_secs: Option<u64>,
    pub time_type: TimeType,
    /// Above this many records a reap pass also halves every leaf depth.
    pub record_threshold: Option<usize>,
    pub settings: ReapSettings,
    pub overrides: Vec<TtlOverride>,
}

impl Default for ReapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            default_ttl_secs: None,
            time_type: TimeType::Ert,
            record_threshold: None,
            settings: ReapSettings::Normal,
            overrides: Vec::new(),
        }
    }
}

/// Periodic snapshots of the container into a rotated backup directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub basename: String,
    pub interval_secs: u64,
    /// Snapshots kept on disk; `0` keeps all.
    pub max_backups: usize,
    /// Load the newest snapshot in `directory` on start.
    pub restore_on_start: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("lad_backups"),
            basename: "backup_file".into(),
            interval_secs: 30,
            max_backups: 5,
            restore_on_start: false,
        }
    }
}

impl LadConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> ServiceResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ServiceResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ServiceResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        let size = self.sequencer.ring_buffer_size;
        if size == 0 || !size.is_power_of_two() {
            return Err(invalid(format!(
                "sequencer.ring_buffer_size must be a power of two, got {size}"
            )));
        }
        if self.inserters.count == 0 {
            return Err(invalid("inserters.count must be at least 1"));
        }
        if self.container.default_depth == 0 {
            return Err(invalid("container.default_depth must be at least 1"));
        }
        if let Some(o) = self.container.depth_overrides.iter().find(|o| o.depth == 0) {
            return Err(invalid(format!(
                "depth override for data type {} must be at least 1",
                o.user_data_type
            )));
        }
        if self.reap.enabled && self.reap.interval_secs == 0 {
            return Err(invalid("reap.interval_secs must be at least 1"));
        }
        if self.reap.time_type == TimeType::Sclk {
            return Err(invalid(
                "reap.time_type sclk has no wall-clock base to age records against",
            ));
        }
        if let ReapSettings::ReducedTtl(ratio) | ReapSettings::ReduceDepth(ratio) = self.reap.settings {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(format!("reap ratio must be in (0, 1], got {ratio}")));
            }
        }
        if let Some(o) = self.reap.overrides.iter().find(|o| o.level == ContainerLevel::Master) {
            return Err(invalid(format!(
                "TTL override for {:?} must name a level below master; use reap.default_ttl_secs",
                o.identifier
            )));
        }
        if self.persistence.enabled {
            if self.persistence.interval_secs == 0 {
                return Err(invalid("persistence.interval_secs must be at least 1"));
            }
            if self.persistence.basename.is_empty() {
                return Err(invalid("persistence.basename must not be empty"));
            }
        }
        Ok(())
    }

    /// Retention rules for the container.
    pub fn to_policy(&self) -> ContainerPolicy {
        let mut policy = ContainerPolicy::default()
            .with_default_depth(self.container.default_depth)
            .with_reap_time_type(self.reap.time_type);
        for o in &self.container.depth_overrides {
            policy = policy.with_depth(o.user_data_type, o.depth);
        }
        if let Some(secs) = self.reap.default_ttl_secs {
            policy = policy.with_default_ttl(Duration::from_secs(secs));
        }
        for o in &self.reap.overrides {
            policy = policy.with_ttl_override(o.level, o.identifier.clone(), Duration::from_secs(o.ttl_secs));
        }
        policy
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reap.interval_secs),
            settings: self.reap.settings,
            record_threshold: self.reap.record_threshold,
        }
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_types::KeyComponent;

    #[test]
    fn defaults() {
        let c = LadConfig::default();
        assert_eq!(c.sequencer.ring_buffer_size, 1024);
        assert_eq!(c.sequencer.wait_strategy, WaitStrategy::Block);
        assert_eq!(c.inserters.count, 2);
        assert_eq!(c.container.default_depth, 10);
        assert!(c.reap.enabled);
        assert!(c.reap.default_ttl_secs.is_none());
        assert!(!c.persistence.enabled);
        assert_eq!(c.persistence.basename, "backup_file");
        c.validate().unwrap();
    }

    #[test]
    fn toml_roundtrip() {
        let mut c = LadConfig::default();
        c.reap.default_ttl_secs = Some(300);
        c.reap.settings = ReapSettings::ReducedTtl(0.5);
        c.reap.overrides.push(TtlOverride {
            level: ContainerLevel::Host,
            identifier: "gds-01".into(),
            ttl_secs: 60,
        });
        c.container.depth_overrides.push(DepthOverride {
            user_data_type: 1,
            depth: 50,
        });
        let text = c.to_toml().unwrap();
        assert_eq!(LadConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c = LadConfig::from_toml_str(
            r#"
            [sequencer]
            ring_buffer_size = 4096
            wait_strategy = "SPIN"

            [reap]
            default_ttl_secs = 5
            time_type = "scet"
            "#,
        )
        .unwrap();
        assert_eq!(c.sequencer.ring_buffer_size, 4096);
        assert_eq!(c.sequencer.wait_strategy, WaitStrategy::Spin);
        assert_eq!(c.reap.time_type, TimeType::Scet);
        assert_eq!(c.reap.interval_secs, 10);
        assert_eq!(c.inserters, InserterConfig::default());
    }

    #[test]
    fn invalid_values_rejected() {
        let bad_ring = "[sequencer]\nring_buffer_size = 1000\n";
        assert!(matches!(
            LadConfig::from_toml_str(bad_ring),
            Err(ServiceError::InvalidConfig(_))
        ));

        let no_inserters = "[inserters]\ncount = 0\n";
        assert!(matches!(
            LadConfig::from_toml_str(no_inserters),
            Err(ServiceError::InvalidConfig(_))
        ));

        let bad_ratio = "[reap.settings]\nmode = \"reduce_depth\"\nratio = 2.0\n";
        assert!(matches!(
            LadConfig::from_toml_str(bad_ratio),
            Err(ServiceError::InvalidConfig(_))
        ));

        let sclk_reap = "[reap]\ndefault_ttl_secs = 60\ntime_type = \"sclk\"\n";
        assert!(matches!(
            LadConfig::from_toml_str(sclk_reap),
            Err(ServiceError::InvalidConfig(msg)) if msg.contains("sclk")
        ));

        let nan_ratio = "[reap.settings]\nmode = \"reduced_ttl\"\nratio = nan\n";
        assert!(matches!(
            LadConfig::from_toml_str(nan_ratio),
            Err(ServiceError::InvalidConfig(_))
        ));

        assert!(matches!(
            LadConfig::from_toml_str("[sequencer]\nwait_strategy = \"NAP\"\n"),
            Err(ServiceError::TomlDe(_))
        ));
    }

    #[test]
    fn policy_reflects_config() {
        let mut c = LadConfig::default();
        c.container.default_depth = 3;
        c.container.depth_overrides.push(DepthOverride {
            user_data_type: 1,
            depth: 7,
        });
        c.reap.default_ttl_secs = Some(30);
        c.reap.overrides.push(TtlOverride {
            level: ContainerLevel::Scid,
            identifier: "76".into(),
            ttl_secs: 5,
        });

        let policy = c.to_policy();
        assert_eq!(policy.depth_for(0), 3);
        assert_eq!(policy.depth_for(1), 7);
        assert_eq!(policy.own_ttl(ContainerLevel::Master, None), Some(Duration::from_secs(30)));
        assert_eq!(
            policy.own_ttl(ContainerLevel::Scid, Some(&KeyComponent::Number(76))),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lad.toml");
        fs::write(&path, "[inserters]\ncount = 4\nmode = \"discard\"\n").unwrap();
        let c = LadConfig::from_file(&path).unwrap();
        assert_eq!(c.inserters.count, 4);
        assert_eq!(c.inserters.mode, InserterMode::Discard);
        assert!(matches!(
            LadConfig::from_file(&dir.path().join("missing.toml")),
            Err(ServiceError::Io(_))
        ));
    }
}
