use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::shared::{BatchConfig, ValidationError};

/// Default bound on a single fetch step against the source.
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// How a pipeline without a stored watermark starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    /// Replays the whole source table once, then continues incrementally.
    FullSync,
    /// Skips existing rows and starts from the current maximum change value.
    WatermarkOnly,
}

impl fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapMode::FullSync => write!(f, "full_sync"),
            BootstrapMode::WatermarkOnly => write!(f, "watermark_only"),
        }
    }
}

/// Configuration of a single polling pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Identifier of the pipeline, the watermark is stored under it.
    pub id: u64,
    /// Seconds between two polls of the source.
    pub poll_interval_secs: u64,
    /// Behavior on the first poll, when no watermark is stored yet.
    pub bootstrap_mode: BootstrapMode,
    /// Upper bound, in milliseconds, of every await on the source within a cycle.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_secs < 1 {
            return Err(ValidationError::PollIntervalTooShort(self.poll_interval_secs));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(ValidationError::FetchTimeoutZero);
        }

        self.batch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            id: 1,
            poll_interval_secs: 10,
            bootstrap_mode: BootstrapMode::WatermarkOnly,
            fetch_timeout_ms: 1000,
            batch: BatchConfig::default(),
        }
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = pipeline_config();
        assert!(config.validate().is_ok());

        config.poll_interval_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::PollIntervalTooShort(0))
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = pipeline_config();
        config.batch.max_size = 0;

        assert_eq!(config.validate(), Err(ValidationError::BatchMaxSizeZero));
    }
}
