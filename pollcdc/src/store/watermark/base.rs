use std::future::Future;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{ChangeValue, Watermark};

/// Storage of the [`Watermark`] of a single polling partition.
///
/// A store is owned by exactly one pipeline. Implementations keep the last loaded or committed
/// watermark cached so that [`WatermarkStore::get`] never touches the backing storage, and must
/// make [`WatermarkStore::commit`] atomic with respect to [`WatermarkStore::get`].
pub trait WatermarkStore {
    /// Loads the watermark from the backing storage into the cache and returns it.
    ///
    /// A partition that was never committed loads as [`Watermark::default`].
    fn load(&self) -> impl Future<Output = CdcResult<Watermark>> + Send;

    /// Returns the cached watermark.
    fn get(&self) -> impl Future<Output = CdcResult<Watermark>> + Send;

    /// Persists `value` as the new watermark, optionally setting `first_poll_done`, and returns
    /// the stored watermark.
    ///
    /// Fails with [`ErrorKind::InvalidState`] when `value` is lower than the stored value.
    fn commit(
        &self,
        value: ChangeValue,
        mark_first_poll_done: bool,
    ) -> impl Future<Output = CdcResult<Watermark>> + Send;
}

/// Computes the watermark resulting from committing `value` on top of `current`.
///
/// `first_poll_done` is sticky: once set, a commit never clears it.
pub fn advance_watermark(
    current: Watermark,
    value: ChangeValue,
    mark_first_poll_done: bool,
) -> CdcResult<Watermark> {
    if let Some(stored) = current.last_change_value
        && value < stored
    {
        bail!(
            ErrorKind::InvalidState,
            "Watermark regression",
            format!("Cannot commit watermark {value}, the stored watermark is {stored}")
        );
    }

    Ok(Watermark {
        last_change_value: Some(value),
        first_poll_done: current.first_poll_done || mark_first_poll_done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_from_empty_watermark() {
        let watermark =
            advance_watermark(Watermark::default(), ChangeValue::from_millis(10), true).unwrap();

        assert_eq!(
            watermark,
            Watermark::new(Some(ChangeValue::from_millis(10)), true)
        );
    }

    #[test]
    fn advance_to_same_value_is_allowed() {
        let current = Watermark::new(Some(ChangeValue::from_millis(10)), true);

        let watermark = advance_watermark(current, ChangeValue::from_millis(10), false).unwrap();

        assert_eq!(watermark, current);
    }

    #[test]
    fn first_poll_done_is_sticky() {
        let current = Watermark::new(Some(ChangeValue::from_millis(10)), true);

        let watermark = advance_watermark(current, ChangeValue::from_millis(20), false).unwrap();

        assert!(watermark.first_poll_done);
    }

    #[test]
    fn regression_is_rejected() {
        let current = Watermark::new(Some(ChangeValue::from_millis(10)), true);

        let err = advance_watermark(current, ChangeValue::from_millis(9), false).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
