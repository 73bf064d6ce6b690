use std::fmt;
use std::time::Duration;

use crate::types::{ChangeValue, Watermark};

/// Identifier of a poll tick, strictly increasing from 0.
pub type TickId = u64;

/// Query shape used by a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Bootstrap by reading the whole table.
    FullSync,
    /// Bootstrap by reading only the current maximum change value.
    WatermarkOnly,
    /// Steady state, rows changed after the watermark.
    Incremental,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::FullSync => write!(f, "full_sync"),
            FetchMode::WatermarkOnly => write!(f, "watermark_only"),
            FetchMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Bookkeeping of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCycle {
    pub tick_id: TickId,
    pub watermark_at_start: Watermark,
    pub mode: FetchMode,
    pub rows_emitted: u64,
    pub max_change_value_seen: Option<ChangeValue>,
}

impl PollCycle {
    pub fn new(tick_id: TickId, watermark_at_start: Watermark, mode: FetchMode) -> Self {
        Self {
            tick_id,
            watermark_at_start,
            mode,
            rows_emitted: 0,
            max_change_value_seen: None,
        }
    }

    /// Records a change value, keeping the running maximum.
    pub fn observe(&mut self, change_value: Option<ChangeValue>) {
        if let Some(change_value) = change_value {
            self.max_change_value_seen = Some(match self.max_change_value_seen {
                Some(max) => max.max(change_value),
                None => change_value,
            });
        }
    }
}

/// How a cycle which did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new watermark was committed.
    Committed { watermark: ChangeValue },
    /// Nothing changed, the watermark was left as is.
    Unchanged,
    /// Shutdown interrupted the cycle before the commit.
    Cancelled,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Committed { .. } => "committed",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::Cancelled => "cancelled",
        }
    }
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: PollCycle,
    pub outcome: CycleOutcome,
    pub duration: Duration,
}
