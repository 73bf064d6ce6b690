mod base;
mod batch;
mod connection;
mod destination;
mod pipeline;
mod replicator;
mod sentry;
mod state_store;
mod table;

pub use base::*;
pub use batch::*;
pub use connection::*;
pub use destination::*;
pub use pipeline::*;
pub use replicator::*;
pub use sentry::*;
pub use state_store::*;
pub use table::*;
