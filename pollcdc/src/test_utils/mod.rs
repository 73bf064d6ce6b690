//! Helpers for testing polling pipelines.
//!
//! Provides a manually driven clock, fault injecting sources and sinks, a sink wrapper and a
//! watermark store which notify when a condition is met, and builders for a small test table.
pub mod clock;
pub mod fault;
pub mod notify;
pub mod pipeline;
pub mod table;
pub mod test_sink_wrapper;
