//! Incremental change data capture by polling.
//!
//! A [`pipeline::Pipeline`] periodically reads the rows of a source table whose last-modified
//! column moved past a stored watermark, upserts them into a sink keyed by primary key and
//! advances the watermark once the rows are written.

pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod polling;
pub mod sink;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod time;
pub mod types;
pub mod workers;
