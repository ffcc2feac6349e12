//! Dispatcher: runs a task through the pipeline and builds its response.

use std::sync::Arc;
use std::time::Instant;

use meshlink_core::{TaskCall, TaskError, TaskResponse};
use tower::ServiceExt;

use super::middleware::{build_task_pipeline, TaskPipeline};
use super::registry::HandlerRegistry;
use super::response::ResponseBuilder;
use super::router::TaskRouter;
use crate::config::AdapterConfig;

/// Entry point for running tasks, shared by the session and the stdio worker.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pipeline: TaskPipeline,
    responses: ResponseBuilder,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: &AdapterConfig) -> Self {
        Self {
            pipeline: build_task_pipeline(TaskRouter::new(registry), &config.dispatch),
            responses: ResponseBuilder::new(config),
        }
    }

    /// Runs `call` and returns the finished response. Never fails: handler
    /// errors become `error`-status responses.
    ///
    /// Duration is measured from acceptance here to the result being ready.
    pub async fn dispatch(&self, call: TaskCall) -> TaskResponse {
        let start = Instant::now();
        let key = call.key.clone();
        let outcome = self.pipeline.clone().oneshot(call).await;
        self.responses.finish(Some(&key), outcome, start.elapsed())
    }

    /// Response for a task that could not be dispatched at all.
    #[must_use]
    pub fn reject(&self, err: &TaskError) -> TaskResponse {
        self.responses.rejection(err)
    }

    #[must_use]
    pub fn responses(&self) -> &ResponseBuilder {
        &self.responses
    }
}
