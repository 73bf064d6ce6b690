mod base;
mod memory;
mod postgres;

pub use base::{WatermarkStore, advance_watermark};
pub use memory::MemoryWatermarkStore;
pub use postgres::PostgresWatermarkStore;
