//! Typed task API.
//!
//! The wire type string of a task is tied to a payload type, and a handler is
//! registered per payload type, so a typo in a type string cannot route a
//! task to the wrong handler.
//!
//! - **Typed surface**: `TaskPayload`, `Handler<T>`
//! - **Erased core**: `DynHandler`, stored in the `Router`

pub mod handler;
pub mod payload;
pub mod router;

pub use self::handler::{DynHandler, Handler, HandlerResult, TypedHandler};
pub use self::payload::{EventReminder, InvitationEmail, ReminderEmail, TaskPayload};
pub use self::router::{RegistryError, Router};
