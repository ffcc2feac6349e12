//! Timeout middleware for tasks.
//!
//! Fails tasks that run longer than the configured deadline with
//! `TaskError::Execution`. The inner future is dropped on expiry, which kills
//! any child process it owns.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use meshlink_core::{TaskCall, TaskError, TaskResponse};
use tower::{Layer, Service};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing one deadline for every task. `None` disables it.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Option<Duration>,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the task deadline.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S> Service<TaskCall> for TimeoutService<S>
where
    S: Service<TaskCall, Response = TaskResponse, Error = TaskError> + Send,
    S::Future: Send + 'static,
{
    type Response = TaskResponse;
    type Error = TaskError;
    type Future = Pin<Box<dyn Future<Output = Result<TaskResponse, TaskError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: TaskCall) -> Self::Future {
        let timeout = self.timeout;
        let fut = self.inner.call(call);
        Box::pin(async move {
            let Some(duration) = timeout else {
                return fut.await;
            };
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TaskError::execution(format!(
                    "Task timed out after {}ms",
                    duration.as_millis()
                ))),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
