//! Port implementations.
//!
//! - **InMemoryStore**: users, events and RSVPs for the demo binary and tests
//! - **HttpMailTransport**: the production mail transport
//! - **LogMailTransport**: logs instead of sending
//!
//! The in-memory broker lives in [`crate::queue`].

pub mod http_mail;
pub mod log_mail;
pub mod memory_store;

pub use self::http_mail::HttpMailTransport;
pub use self::log_mail::LogMailTransport;
pub use self::memory_store::InMemoryStore;
