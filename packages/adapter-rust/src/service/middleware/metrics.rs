//! Metrics middleware for tasks.
//!
//! Records task duration and outcome on a `tracing` span and emits one
//! `task complete` event per task. There is no separate metrics exporter.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use meshlink_core::{TaskCall, TaskError, TaskResponse, TaskStatus};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments tasks with timing via `tracing` spans.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records task duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<TaskCall> for MetricsService<S>
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
        let task = call.key.clone();
        let trace_id = call.trace_id.clone().unwrap_or_default();

        let span = info_span!(
            "task",
            task = %task,
            trace_id = %trace_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                // A handler may report failure through an error-status response.
                let outcome = match &result {
                    Ok(resp) if resp.status == TaskStatus::Ok => "ok",
                    Ok(_) => "error",
                    Err(e) => e.kind().as_str(),
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::info!(task = %task, duration_ms, outcome, "task complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    /// Immediately-completing service that fails for keys starting with `fail`.
    struct ImmediateService;

    impl Service<TaskCall> for ImmediateService {
        type Response = TaskResponse;
        type Error = TaskError;
        type Future = Pin<Box<dyn Future<Output = Result<TaskResponse, TaskError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: TaskCall) -> Self::Future {
            Box::pin(async move {
                if call.key.starts_with("fail") {
                    Err(TaskError::computation("boom"))
                } else {
                    Ok(TaskResponse::ok(json!(call.key)))
                }
            })
        }
    }

    fn call(key: &str) -> TaskCall {
        TaskCall::from_payload(&json!({ "task_name": key })).unwrap()
    }

    #[tokio::test]
    async fn passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let resp = svc.oneshot(call("math.sum")).await.unwrap();
        assert_eq!(resp.result, Some(json!("math.sum")));
    }

    #[tokio::test]
    async fn passes_through_error() {
        let svc = MetricsLayer.layer(ImmediateService);
        let err = svc.oneshot(call("fail.now")).await.unwrap_err();
        assert_eq!(err, TaskError::computation("boom"));
    }
}
