use std::fmt;

use crate::types::ChangeValue;

/// Progress of a polling partition.
///
/// `last_change_value` is the highest change value consumed so far and never decreases once
/// set. `first_poll_done` records that the bootstrap poll completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    pub last_change_value: Option<ChangeValue>,
    pub first_poll_done: bool,
}

impl Watermark {
    pub fn new(last_change_value: Option<ChangeValue>, first_poll_done: bool) -> Self {
        Self {
            last_change_value,
            first_poll_done,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_change_value {
            Some(value) => write!(f, "{value} (first poll done: {})", self.first_poll_done),
            None => write!(f, "empty (first poll done: {})", self.first_poll_done),
        }
    }
}
