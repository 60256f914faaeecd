//! Router: task type string -> handler.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, HandlerResult, TypedHandler};
use super::payload::TaskPayload;
use crate::domain::{QueuedTask, TaskError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Maps wire type strings to type-erased handlers.
///
/// ```ignore
/// let mut router = Router::new();
/// router.register::<InvitationEmail, _>(SendInvitation::new(mail))?;
/// let result = router.dispatch(&queued).await?;
/// ```
#[derive(Default, Clone)]
pub struct Router {
    handlers: HashMap<&'static str, Arc<dyn DynHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        if self.handlers.contains_key(T::TYPE) {
            return Err(RegistryError::AlreadyRegistered(T::TYPE.to_string()));
        }
        self.handlers
            .insert(T::TYPE, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Run the handler registered for `task`'s type.
    pub async fn dispatch(&self, task: &QueuedTask) -> HandlerResult {
        let handler = self
            .get(task.task_type().as_str())
            .ok_or_else(|| TaskError::HandlerNotFound(task.task_type().clone()))?;
        handler.handle_dyn(task.payload()).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Alpha {
        value: i32,
    }

    impl TaskPayload for Alpha {
        const TYPE: &'static str = "alpha";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Beta {
        name: String,
    }

    impl TaskPayload for Beta {
        const TYPE: &'static str = "beta";
    }

    struct AlphaHandler;

    #[async_trait]
    impl Handler<Alpha> for AlphaHandler {
        async fn handle(&self, task: Alpha) -> HandlerResult {
            Ok(Some(format!("alpha {}", task.value)))
        }
    }

    struct BetaHandler;

    #[async_trait]
    impl Handler<Beta> for BetaHandler {
        async fn handle(&self, task: Beta) -> HandlerResult {
            Err(TaskError::HandlerExecution(format!("beta {} failed", task.name)))
        }
    }

    #[test]
    fn register_and_get() {
        let mut router = Router::new();
        router.register::<Alpha, _>(AlphaHandler).unwrap();
        assert!(router.get(Alpha::TYPE).is_some());
        assert!(router.get(Beta::TYPE).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut router = Router::new();
        router.register::<Alpha, _>(AlphaHandler).unwrap();
        let result = router.register::<Alpha, _>(AlphaHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == "alpha"));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut router = Router::new();
        router.register::<Beta, _>(BetaHandler).unwrap();
        router.register::<Alpha, _>(AlphaHandler).unwrap();
        assert_eq!(router.registered_types(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn dispatch_routes_by_type() {
        let mut router = Router::new();
        router.register::<Alpha, _>(AlphaHandler).unwrap();
        router.register::<Beta, _>(BetaHandler).unwrap();

        let alpha = QueuedTask::new(
            crate::domain::TaskType::new("alpha"),
            br#"{"value":3}"#.to_vec(),
        );
        assert_eq!(
            router.dispatch(&alpha).await.unwrap().as_deref(),
            Some("alpha 3")
        );

        let beta = QueuedTask::new(
            crate::domain::TaskType::new("beta"),
            br#"{"name":"b"}"#.to_vec(),
        );
        assert!(matches!(
            router.dispatch(&beta).await,
            Err(TaskError::HandlerExecution(_))
        ));
    }

    #[tokio::test]
    async fn unknown_type_has_no_handler() {
        let router = Router::new();
        let task = QueuedTask::new(crate::domain::TaskType::new("gamma"), b"{}".to_vec());
        assert!(matches!(
            router.dispatch(&task).await,
            Err(TaskError::HandlerNotFound(_))
        ));
    }
}
