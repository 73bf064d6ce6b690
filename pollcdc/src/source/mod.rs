//! Change fetchers reading the polled table.

mod base;
mod memory;
mod mysql;

pub use base::{ChangeSession, ChangeSource, ChangeStream};
pub use memory::{MemorySession, MemorySource};
pub use mysql::MySqlSource;
