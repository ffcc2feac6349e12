//! Code execution (`code.execute`): runs source text in a child interpreter.
//!
//! The code is passed as the final argument of the configured program
//! (`python3 -c <code>` by default). The child has no stdin, is killed when
//! the timeout elapses, and its captured output is capped.

use std::process::Stdio;

use async_trait::async_trait;
use meshlink_core::{ErrorKind, TaskCall, TaskError, TaskResponse};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::ExecutionConfig;
use crate::service::operation::TaskRequest;
use crate::service::registry::{unexpected_request, TaskHandler};

#[derive(Debug, Clone)]
pub struct CodeExecHandler {
    config: ExecutionConfig,
}

impl CodeExecHandler {
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }
}

/// Keeps the first `max` bytes of a pipe and discards the rest, so the child
/// never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    max: usize,
) -> std::io::Result<String> {
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut kept = Vec::new();
    (&mut pipe)
        .take(u64::try_from(max).unwrap_or(u64::MAX))
        .read_to_end(&mut kept)
        .await?;
    tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    Ok(String::from_utf8_lossy(&kept).into_owned())
}

#[async_trait]
impl TaskHandler for CodeExecHandler {
    fn name(&self) -> &'static str {
        "code"
    }

    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError> {
        match call.args.get("code").and_then(Value::as_str) {
            Some(code) if !code.trim().is_empty() => Ok(TaskRequest::Execute {
                code: code.to_string(),
            }),
            _ => Err(TaskError::validation("Missing code")),
        }
    }

    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        let TaskRequest::Execute { code } = request else {
            return Err(unexpected_request(self.name(), &request));
        };

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TaskError::execution(format!(
                    "Failed to start {}: {e}",
                    self.config.program
                ))
            })?;

        let max = self.config.max_output_bytes;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let run = async {
            tokio::try_join!(
                read_capped(stdout_pipe, max),
                read_capped(stderr_pipe, max),
                child.wait(),
            )
        };

        let (stdout, stderr, status) = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TaskError::execution(format!("Execution failed: {e}"))),
            Err(_) => {
                let ms = self.config.timeout.as_millis();
                tracing::warn!(timeout_ms = ms, "code execution timed out");
                return Err(TaskError::execution(format!(
                    "Execution timed out after {ms}ms"
                )));
            }
        };

        let exit_code = status.code();

        let response = if status.success() {
            TaskResponse::ok(Value::String(stdout.clone()))
        } else {
            let message = match stderr.trim() {
                "" => match exit_code {
                    Some(code) => format!("Process exited with status {code}"),
                    None => "Process terminated by signal".to_string(),
                },
                err => err.to_string(),
            };
            TaskResponse::error(message, ErrorKind::Execution)
        };

        Ok(response
            .with_kind("code")
            .with_extra("stdout", stdout)
            .with_extra("stderr", stderr)
            .with_extra("exit_code", exit_code.map_or(Value::Null, Value::from)))
    }
}
