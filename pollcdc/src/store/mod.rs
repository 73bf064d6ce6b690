//! Persistence of the per-pipeline watermark.

pub mod watermark;
