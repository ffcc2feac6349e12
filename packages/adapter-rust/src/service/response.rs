//! Response builder: stamps handler outcomes with identity and timing and
//! wraps them into reply envelopes.

use std::time::Duration;

use meshlink_core::{intents, Envelope, ResponseMeta, TaskError, TaskResponse};
use serde_json::{json, Value};

use crate::config::AdapterConfig;

/// Milliseconds with microsecond resolution.
fn duration_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1_000_000.0).round() / 1000.0
}

/// Builds `TaskResponse`s and reply envelopes for one adapter identity.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    adapter_id: String,
    adapter_version: String,
    version: &'static str,
}

impl ResponseBuilder {
    #[must_use]
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            adapter_id: config.adapter_id.clone(),
            adapter_version: config.adapter_version.clone(),
            version: config.version(),
        }
    }

    /// Completes a handler outcome.
    ///
    /// Errors become `error`-status responses. Every response gets
    /// `executed_by`, `meta.duration_ms`, and `meta.adapter_version`; when the
    /// handler did not name the operation, the dispatch key is echoed.
    #[must_use]
    pub fn finish(
        &self,
        key: Option<&str>,
        outcome: Result<TaskResponse, TaskError>,
        elapsed: Duration,
    ) -> TaskResponse {
        let mut response = outcome.unwrap_or_else(|e| TaskResponse::from_task_error(&e));
        if response.operation.is_none() {
            response.operation = key.map(str::to_string);
        }
        response.executed_by = Some(self.adapter_id.clone());
        response.meta = Some(ResponseMeta {
            duration_ms: duration_ms(elapsed),
            adapter_version: self.adapter_version.clone(),
        });
        response
    }

    /// Response for a task rejected before dispatch (e.g. missing `task_name`).
    #[must_use]
    pub fn rejection(&self, err: &TaskError) -> TaskResponse {
        self.finish(None, Err(err.clone()), Duration::ZERO)
    }

    /// Wraps `response` in a `response` envelope addressed to the request's source.
    #[must_use]
    pub fn reply(&self, request: &Envelope, response: &TaskResponse) -> Envelope {
        request.reply(
            self.version,
            self.adapter_id.as_str(),
            intents::RESPONSE,
            to_payload(response),
        )
    }

    /// `pong` answer to a `ping`, echoing its trace id.
    #[must_use]
    pub fn pong(&self, ping: &Envelope) -> Envelope {
        ping.reply(
            self.version,
            self.adapter_id.as_str(),
            intents::PONG,
            json!({ "status": "ok" }),
        )
    }
}

fn to_payload(response: &TaskResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize task response");
        json!({ "status": "error", "error": "response serialization failed" })
    })
}

#[cfg(test)]
mod tests {
    use meshlink_core::{ErrorKind, TaskStatus};

    use super::*;

    fn builder() -> ResponseBuilder {
        let mut config = AdapterConfig::new("rust-adapter");
        config.adapter_version = "3.0.0".to_string();
        ResponseBuilder::new(&config)
    }

    #[test]
    fn finish_stamps_identity_and_timing() {
        let resp = builder().finish(
            Some("math.sum"),
            Ok(TaskResponse::ok(json!(6.0)).with_operation("sum")),
            Duration::from_micros(1500),
        );
        assert_eq!(resp.status, TaskStatus::Ok);
        assert_eq!(resp.operation.as_deref(), Some("sum"));
        assert_eq!(resp.executed_by.as_deref(), Some("rust-adapter"));
        let meta = resp.meta.unwrap();
        assert!((meta.duration_ms - 1.5).abs() < f64::EPSILON);
        assert_eq!(meta.adapter_version, "3.0.0");
    }

    #[test]
    fn finish_converts_errors_and_echoes_key() {
        let resp = builder().finish(
            Some("math.divide"),
            Err(TaskError::computation("Division by zero")),
            Duration::from_millis(2),
        );
        assert_eq!(resp.status, TaskStatus::Error);
        assert_eq!(resp.error.as_deref(), Some("Division by zero"));
        assert_eq!(resp.error_kind, Some(ErrorKind::Computation));
        assert_eq!(resp.operation.as_deref(), Some("math.divide"));
        assert!(resp.result.is_none());
        assert!(resp.meta.is_some());
    }

    #[test]
    fn rejection_has_no_operation() {
        let resp = builder().rejection(&TaskError::validation("Missing task_name"));
        assert_eq!(resp.error_kind, Some(ErrorKind::Validation));
        assert!(resp.operation.is_none());
    }

    #[test]
    fn reply_envelope_targets_requester() {
        let request = Envelope::new("8.0", "caller", "rust-adapter", intents::INVOKE, json!({}))
            .with_trace_id("t-9");
        let resp = builder().finish(None, Ok(TaskResponse::ok(json!(1))), Duration::ZERO);
        let reply = builder().reply(&request, &resp);

        assert_eq!(reply.intent, "response");
        assert_eq!(reply.version, "8.0");
        assert_eq!(reply.source, "rust-adapter");
        assert_eq!(reply.target, "caller");
        assert_eq!(reply.trace_id(), Some("t-9"));
        assert_eq!(reply.payload["status"], "ok");
        assert_eq!(reply.payload["meta"]["adapter_version"], "3.0.0");
    }

    #[test]
    fn pong_echoes_trace_id() {
        let ping =
            Envelope::new("8.0", "relay", "rust-adapter", "PING", Value::Null).with_trace_id("p-1");
        let pong = builder().pong(&ping);
        assert_eq!(pong.intent, "pong");
        assert_eq!(pong.target, "relay");
        assert_eq!(pong.trace_id(), Some("p-1"));
    }
}
