use pollcdc_config::shared::BootstrapMode;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{ChangeValue, FetchMode, Watermark};

/// State of a polling partition, derived from its stored [`Watermark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// The bootstrap poll did not complete yet.
    Uninitialized,
    /// Rows up to and including `watermark` were consumed.
    SteadyState { watermark: ChangeValue },
}

impl PartitionState {
    pub fn from_watermark(watermark: &Watermark) -> CdcResult<Self> {
        match (watermark.first_poll_done, watermark.last_change_value) {
            (false, _) => Ok(PartitionState::Uninitialized),
            (true, Some(watermark)) => Ok(PartitionState::SteadyState { watermark }),
            (true, None) => bail!(
                ErrorKind::InvalidState,
                "Inconsistent watermark",
                "The first poll is marked as done but no change value was committed"
            ),
        }
    }

    pub fn fetch_mode(&self, bootstrap_mode: BootstrapMode) -> FetchMode {
        match (self, bootstrap_mode) {
            (PartitionState::Uninitialized, BootstrapMode::FullSync) => FetchMode::FullSync,
            (PartitionState::Uninitialized, BootstrapMode::WatermarkOnly) => {
                FetchMode::WatermarkOnly
            }
            (PartitionState::SteadyState { .. }, _) => FetchMode::Incremental,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_watermark_is_uninitialized() {
        let state = PartitionState::from_watermark(&Watermark::default()).unwrap();

        assert_eq!(state, PartitionState::Uninitialized);
        assert_eq!(
            state.fetch_mode(BootstrapMode::FullSync),
            FetchMode::FullSync
        );
        assert_eq!(
            state.fetch_mode(BootstrapMode::WatermarkOnly),
            FetchMode::WatermarkOnly
        );
    }

    #[test]
    fn value_without_first_poll_is_still_uninitialized() {
        let watermark = Watermark::new(Some(ChangeValue::from_millis(10)), false);

        assert_eq!(
            PartitionState::from_watermark(&watermark).unwrap(),
            PartitionState::Uninitialized
        );
    }

    #[test]
    fn completed_first_poll_is_steady_state() {
        let watermark = Watermark::new(Some(ChangeValue::from_millis(10)), true);
        let state = PartitionState::from_watermark(&watermark).unwrap();

        assert_eq!(
            state,
            PartitionState::SteadyState {
                watermark: ChangeValue::from_millis(10)
            }
        );
        assert_eq!(
            state.fetch_mode(BootstrapMode::FullSync),
            FetchMode::Incremental
        );
    }

    #[test]
    fn first_poll_without_value_is_invalid() {
        let watermark = Watermark::new(None, true);

        let err = PartitionState::from_watermark(&watermark).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
