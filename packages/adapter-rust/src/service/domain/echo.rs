//! `echo`: returns the task arguments unchanged.

use async_trait::async_trait;
use meshlink_core::{TaskCall, TaskError, TaskResponse};

use crate::service::operation::TaskRequest;
use crate::service::registry::{unexpected_request, TaskHandler};

#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError> {
        Ok(TaskRequest::Echo {
            args: call.args.clone(),
        })
    }

    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        match request {
            TaskRequest::Echo { args } => Ok(TaskResponse::ok(args).with_kind("echo")),
            other => Err(unexpected_request(self.name(), &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn returns_arguments() {
        let call = TaskCall::from_payload(&json!({"task_name": "echo", "data": {"x": [1, 2]}}))
            .unwrap();
        let resp = EchoHandler
            .handle(EchoHandler.decode(&call).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!({"x": [1, 2]})));
        assert_eq!(resp.kind.as_deref(), Some("echo"));
    }
}
