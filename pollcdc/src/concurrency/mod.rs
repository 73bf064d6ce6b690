//! Shutdown signalling and the stream adapter used to batch fetched rows.

pub mod batch;
pub mod shutdown;
