use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;

/// What a policy enforcer should do when the trash exceeds its size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullTrashAction {
    WarnOnly,
    DeleteOldest,
    DeleteBiggest,
}

/// Per-trash eviction thresholds.
///
/// These are inputs for an external policy layer; the engine only loads
/// them and exposes `trash_size` / `partition_usage` so that layer can
/// decide when to purge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrashLimits {
    pub use_age_limit: bool,
    pub age_limit_days: u32,
    pub use_size_limit: bool,
    /// Maximum trash size as a percentage of the backing partition.
    pub size_limit_percent: f64,
    pub full_trash_action: FullTrashAction,
}

impl Default for TrashLimits {
    fn default() -> Self {
        TrashLimits {
            use_age_limit: false,
            age_limit_days: 7,
            use_size_limit: false,
            size_limit_percent: 10.0,
            full_trash_action: FullTrashAction::WarnOnly,
        }
    }
}

pub fn load_configuration() -> Result<TrashLimits, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .build()?;
    builder.try_deserialize::<TrashLimits>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let limits = TrashLimits::default();
        assert!(!limits.use_age_limit);
        assert_eq!(limits.age_limit_days, 7);
        assert_eq!(limits.full_trash_action, FullTrashAction::WarnOnly);
    }
}
