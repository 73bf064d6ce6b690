//! Data types shared by the source, the sink, the watermark store and the orchestrator.

mod cell;
mod change;
mod cycle;
mod schema;
mod table_row;
mod watermark;

pub use cell::*;
pub use change::*;
pub use cycle::*;
pub use schema::*;
pub use table_row::*;
pub use watermark::*;

/// Identifier of a pipeline, which is also its polling partition.
pub type PipelineId = u64;
