//! String family (`string.<op>`).

use async_trait::async_trait;
use meshlink_core::{TaskCall, TaskError, TaskResponse};
use serde_json::{json, Value};

use crate::service::operation::{TaskRequest, TextOp};
use crate::service::registry::{unexpected_request, TaskHandler};

#[derive(Debug, Default)]
pub struct TextHandler;

fn apply(op: TextOp, text: &str) -> Value {
    match op {
        TextOp::Upper => json!(text.to_uppercase()),
        TextOp::Lower => json!(text.to_lowercase()),
        TextOp::Trim => json!(text.trim()),
        TextOp::Length => json!(text.chars().count()),
        TextOp::Reverse => json!(text.chars().rev().collect::<String>()),
    }
}

#[async_trait]
impl TaskHandler for TextHandler {
    fn name(&self) -> &'static str {
        "string"
    }

    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError> {
        let Some(text) = call.args.get("text").and_then(Value::as_str) else {
            return Err(TaskError::validation("Field `text` must be a string"));
        };
        let op = TextOp::parse(call.suffix()).ok_or_else(|| {
            let supported: Vec<&str> = TextOp::ALL.iter().map(|op| op.as_str()).collect();
            TaskError::computation(format!(
                "Unknown string task_name: {} (supported: {})",
                call.key,
                supported.join(", ")
            ))
        })?;
        Ok(TaskRequest::Text {
            op,
            text: text.to_string(),
        })
    }

    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        let TaskRequest::Text { op, text } = request else {
            return Err(unexpected_request(self.name(), &request));
        };
        Ok(TaskResponse::ok(apply(op, &text))
            .with_kind("string")
            .with_operation(op.as_str()))
    }
}
