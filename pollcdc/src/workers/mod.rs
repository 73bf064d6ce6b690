//! Workers driving a polling pipeline.
//!
//! The ticker worker emits ticks at the poll interval and the poll worker runs one poll cycle per
//! tick it receives, serially, as the only owner of the partition.

pub mod base;
pub mod poller;
pub mod ticker;
