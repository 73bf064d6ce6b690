//! Configuration for pollcdc pipelines.
//!
//! Holds the typed configuration of a polling pipeline together with the loader which layers
//! YAML files and environment variables on top of each other.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
