//! Task routing: dispatches a `TaskCall` to its handler by dispatch key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use meshlink_core::{TaskCall, TaskError, TaskResponse};
use tower::Service;

use super::registry::HandlerRegistry;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<TaskResponse, TaskError>> + Send>>;

// ---------------------------------------------------------------------------
// TaskRouter
// ---------------------------------------------------------------------------

/// Routes each `TaskCall` to the handler registered for its key.
///
/// A key with no handler yields `TaskError::Computation` naming the key, so a
/// well-formed invoke is never silently dropped.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    registry: Arc<HandlerRegistry>,
}

impl TaskRouter {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

impl Service<TaskCall> for TaskRouter {
    type Response = TaskResponse;
    type Error = TaskError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: TaskCall) -> Self::Future {
        let Some(handler) = self.registry.lookup(&call.key) else {
            let key = call.key;
            return Box::pin(async move {
                Err(TaskError::computation(format!("Unknown task_name: {key}")))
            });
        };

        Box::pin(async move {
            let request = handler.decode(&call)?;
            tracing::debug!(
                task = %call.key,
                handler = handler.name(),
                family = request.family(),
                "dispatching task"
            );
            handler.handle(request).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
