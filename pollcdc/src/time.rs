use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Source of the current wall-clock time.
///
/// Used for the tick timestamps, for the sequence token of rows without a change value and for
/// the watermark committed when a bootstrap finds no change value.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
