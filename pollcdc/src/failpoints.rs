//! Failpoints used by tests to inject failures into a poll cycle.

use fail::fail_point;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};

pub const POLL_CYCLE_BEFORE_COMMIT: &str = "poll_cycle.before_commit";
pub const POLL_CYCLE_BEFORE_SINK_WRITE: &str = "poll_cycle.before_sink_write";

/// Returns an error when the failpoint `name` is configured to return.
///
/// The optional parameter selects the error kind: `"sink"` gives
/// [`ErrorKind::DestinationError`], `"source"` gives [`ErrorKind::SourceQueryFailed`] and anything
/// else [`ErrorKind::FailpointTriggered`].
pub fn cdc_fail_point(name: &str) -> CdcResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("sink") => ErrorKind::DestinationError,
            Some("source") => ErrorKind::SourceQueryFailed,
            _ => ErrorKind::FailpointTriggered,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
