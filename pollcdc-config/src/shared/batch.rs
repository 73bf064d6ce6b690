use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Size and time bounds of the batches handed to the sink.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows in a batch.
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before writing it.
    pub max_fill_ms: u64,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::BatchMaxSizeZero);
        }

        if self.max_fill_ms == 0 {
            return Err(ValidationError::BatchMaxFillZero);
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_fill_ms: 1000,
        }
    }
}
