use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::shared::ValidationError;

/// Upper bound of the BigQuery `max_staleness` table option.
const MAX_STALENESS_MINS_LIMIT: u16 = 1440;

/// What the sink does at startup when the target table does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// Refuse to start.
    #[default]
    FailIfMissing,
    /// Create the table from the configured schema.
    CreateIfMissing,
}

/// How rows with an existing primary key are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMethod {
    /// Last writer by sequence token wins.
    #[default]
    Upsert,
    /// Every delivered row is appended.
    AppendOnly,
}

/// Concrete sink the rows are written to.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetConfig {
    /// In-memory table, useful for local runs.
    Memory,
    BigQuery {
        project_id: String,
        dataset_id: String,
        table_id: String,
        /// Path to the service account key file used to authenticate.
        service_account_key_path: String,
        /// Maximum staleness in minutes applied when the table is created.
        #[serde(default)]
        max_staleness_mins: Option<u16>,
    },
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::BigQuery {
                project_id,
                dataset_id,
                table_id,
                service_account_key_path: _,
                max_staleness_mins,
            } => f
                .debug_struct("BigQuery")
                .field("project_id", project_id)
                .field("dataset_id", dataset_id)
                .field("table_id", table_id)
                .field("service_account_key_path", &"REDACTED")
                .field("max_staleness_mins", max_staleness_mins)
                .finish(),
        }
    }
}

/// Sink writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DestinationConfig {
    #[serde(default)]
    pub create_policy: CreatePolicy,
    #[serde(default)]
    pub conflict_method: ConflictMethod,
    pub target: TargetConfig,
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.target {
            TargetConfig::Memory => Ok(()),
            TargetConfig::BigQuery {
                project_id,
                dataset_id,
                table_id,
                service_account_key_path,
                max_staleness_mins,
            } => {
                if project_id.is_empty() {
                    return Err(ValidationError::EmptyIdentifier(
                        "destination.target.big_query.project_id",
                    ));
                }
                if dataset_id.is_empty() {
                    return Err(ValidationError::EmptyIdentifier(
                        "destination.target.big_query.dataset_id",
                    ));
                }
                if table_id.is_empty() {
                    return Err(ValidationError::EmptyIdentifier(
                        "destination.target.big_query.table_id",
                    ));
                }
                if !Path::new(service_account_key_path).exists() {
                    return Err(ValidationError::MissingServiceAccountKey(
                        service_account_key_path.clone(),
                    ));
                }
                if let Some(max_staleness_mins) = max_staleness_mins
                    && *max_staleness_mins > MAX_STALENESS_MINS_LIMIT
                {
                    return Err(ValidationError::MaxStalenessTooLarge(*max_staleness_mins));
                }

                Ok(())
            }
        }
    }
}
