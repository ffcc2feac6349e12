//! Task payload shapes: the dispatch request extracted from an `invoke`
//! envelope (or a line-stream input) and the structured response sent back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, TaskError};

// ---------------------------------------------------------------------------
// TaskCall
// ---------------------------------------------------------------------------

/// A dispatchable task: the dispatch key plus the operation-specific fields.
///
/// Two payload layouts are accepted:
/// - flat, as carried by `invoke` envelopes: `{task_name, inputs, ...}`
/// - nested, as carried by the line-stream interface: `{task_name, data: {...}}`
///
/// In both cases `args` ends up holding the operation fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCall {
    /// Key into the handler registry (`task_name`, falling back to `operation`).
    pub key: String,
    /// Operation-specific fields, validated by the handler family.
    pub args: Value,
    /// Trace id of the request, if any. Used for logging only.
    pub trace_id: Option<String>,
}

impl TaskCall {
    /// Extracts the dispatch key and arguments from a task payload.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Validation` if the payload is not an object or if
    /// neither `task_name` nor `operation` is a non-empty string.
    pub fn from_payload(payload: &Value) -> Result<Self, TaskError> {
        let Some(obj) = payload.as_object() else {
            return Err(TaskError::validation("Task payload must be a JSON object"));
        };

        let key = ["task_name", "operation"]
            .iter()
            .find_map(|field| obj.get(*field).and_then(Value::as_str))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TaskError::validation("Missing task_name"))?;

        let args = match obj.get("data") {
            Some(data @ Value::Object(_)) => data.clone(),
            _ => payload.clone(),
        };

        Ok(Self {
            key: key.to_string(),
            args,
            trace_id: None,
        })
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Part of the key after the first `.`, or the whole key when it has none.
    #[must_use]
    pub fn suffix(&self) -> &str {
        self.key.split_once('.').map_or(self.key.as_str(), |(_, s)| s)
    }
}

// ---------------------------------------------------------------------------
// TaskResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Error,
}

/// Timing and version metadata attached to every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Wall-clock time from dispatch acceptance to result, in milliseconds.
    pub duration_ms: f64,
    pub adapter_version: String,
}

/// Structured outcome of a task, sent back to the requester.
///
/// `result` is present iff `status == ok`; `error` is present iff
/// `status == error`. Handler-specific echo fields (`inputs`, `op`, `stdout`,
/// ...) live in `extra` and are flattened into the top-level object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub executed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<ResponseMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResponse {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            status: TaskStatus::Ok,
            kind: None,
            operation: None,
            result: Some(result),
            error: None,
            error_kind: None,
            executed_by: None,
            meta: None,
            extra: Map::new(),
        }
    }

    /// Error response with the given message and classification.
    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            status: TaskStatus::Error,
            kind: None,
            operation: None,
            result: None,
            error: Some(message.into()),
            error_kind: Some(kind),
            executed_by: None,
            meta: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn from_task_error(err: &TaskError) -> Self {
        Self::error(err.message(), err.kind())
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }
}
