//! The change detection state machine run on every tick.

mod orchestrator;
mod state;

pub use orchestrator::Orchestrator;
pub use state::PartitionState;
