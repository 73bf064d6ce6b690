use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    DestinationConfig, PipelineConfig, SentryConfig, SourceConfig, StateStoreConfig, TableConfig,
    ValidationError,
};

/// Complete configuration of the replicator binary.
///
/// Usually loaded with [`crate::load_config`] and validated once with
/// [`ReplicatorConfig::validate`] before anything connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicatorConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub table: TableConfig,
    pub destination: DestinationConfig,
    pub state_store: StateStoreConfig,
    /// Optional Sentry reporting.
    #[serde(default)]
    pub sentry: Option<SentryConfig>,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        self.source.validate()?;
        self.table.validate()?;
        self.destination.validate()?;
        self.state_store.validate()?;

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{BootstrapMode, ConflictMethod, CreatePolicy, FieldMode, TargetConfig};

    const CONFIG: &str = r#"
pipeline:
  id: 7
  poll_interval_secs: 10
  bootstrap_mode: full_sync
source:
  host: localhost
  port: 3306
  name: shop
  username: root
  password: secret
table:
  name: products
  change_column: updated_at
  primary_key_column: id
  fields:
    - { name: id, type: integer }
    - { name: description, type: string, mode: nullable }
    - { name: updated_at, type: datetime }
destination:
  create_policy: create_if_missing
  target: memory
state_store: memory
"#;

    #[test]
    fn deserializes_and_validates_yaml() {
        let config: ReplicatorConfig = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(config.pipeline.id, 7);
        assert_eq!(config.pipeline.bootstrap_mode, BootstrapMode::FullSync);
        assert_eq!(config.pipeline.fetch_timeout_ms, 30_000);
        assert_eq!(config.pipeline.batch.max_size, 1000);
        assert_eq!(config.table.fields[1].mode, FieldMode::Nullable);
        assert_eq!(
            config.destination.create_policy,
            CreatePolicy::CreateIfMissing
        );
        assert_eq!(config.destination.conflict_method, ConflictMethod::Upsert);
        assert!(matches!(config.destination.target, TargetConfig::Memory));
        assert!(matches!(config.state_store, StateStoreConfig::Memory));
        assert!(config.sentry.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_bootstrap_mode_fails_to_deserialize() {
        let config = CONFIG.replace("full_sync", "replay_everything");

        assert!(serde_yaml::from_str::<ReplicatorConfig>(&config).is_err());
    }

    #[test]
    fn missing_bootstrap_mode_fails_to_deserialize() {
        let config = CONFIG.replace("  bootstrap_mode: full_sync\n", "");

        assert!(serde_yaml::from_str::<ReplicatorConfig>(&config).is_err());
    }

    #[test]
    fn invalid_section_fails_validation() {
        let mut config: ReplicatorConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.table.primary_key_column = "sku".to_string();

        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingColumn {
                role: "primary key",
                column: "sku".to_string()
            })
        );
    }
}
