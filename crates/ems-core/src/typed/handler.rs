//! Handler traits.
//!
//! Two layers:
//! - `Handler<T>`: typed, one payload type per handler
//! - `DynHandler`: object-safe, so handlers of different payload types can
//!   live in one map

use std::marker::PhantomData;

use async_trait::async_trait;

use super::payload::TaskPayload;
use crate::domain::TaskError;

/// Outcome of a successful handler run: an optional human-readable result
/// the broker keeps for the task's retention period.
pub type HandlerResult = Result<Option<String>, TaskError>;

/// Runs one kind of task.
///
/// Returning an error hands the task back to the broker, which retries it
/// with the type's retry delay.
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, task: T) -> HandlerResult;
}

/// Type-erased [`Handler`].
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: &[u8]) -> HandlerResult;

    fn task_type(&self) -> &'static str;
}

/// Adapts a `Handler<T>` to [`DynHandler`] by decoding the payload first.
pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: &[u8]) -> HandlerResult {
        let task: T = serde_json::from_slice(payload)?;
        self.handler.handle(task).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}
