//! Sinks applying changed rows to the destination.

mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
mod memory;

pub use base::Sink;
pub use memory::{MemorySink, StoredRow};
