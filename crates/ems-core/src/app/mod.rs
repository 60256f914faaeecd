//! Application layer: the dispatch server and its builder.
//!
//! - **ServerBuilder**: registers handlers and validates the wiring up front
//! - **Server**: lease -> route -> handle -> ack/fail, plus the retention janitor

pub mod builder;
pub mod server;

pub use self::builder::{BuildError, ServerBuilder};
pub use self::server::{Server, ServerConfig, ServerHandle};
