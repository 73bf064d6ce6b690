use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Where the watermark of a pipeline is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Keeps the watermark in process memory, it is lost on restart.
    Memory,
    /// Persists the watermark in a Postgres table keyed by pipeline id.
    Postgres(PgConnectionConfig),
}

impl StateStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StateStoreConfig::Memory => Ok(()),
            StateStoreConfig::Postgres(connection) => connection.validate(),
        }
    }
}
