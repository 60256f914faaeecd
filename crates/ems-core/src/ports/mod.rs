//! Ports: the seams to collaborators outside the task subsystem.
//!
//! - persistence supplies users and accepted attendees
//! - the mail transport delivers one email per call
//! - the clock and id generator are swappable for deterministic tests
//!
//! The broker seam lives in [`crate::queue`] next to its in-memory
//! implementation.

pub mod clock;
pub mod id_generator;
pub mod mail;
pub mod repository;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::mail::{MailError, MailTransport};
pub use self::repository::{EventRepository, RepositoryError, UserRepository};
