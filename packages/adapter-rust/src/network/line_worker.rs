//! Line-stream worker: one `{task_name, data}` object per input line, one
//! response object per output line.
//!
//! Lines are processed strictly in order, each to completion before the next
//! is read. A line that is not JSON yields a single error line and the worker
//! keeps reading; only end of input or a write failure stops it.

use meshlink_core::{codec, ErrorKind, TaskCall, TaskResponse};
use serde_json::Value;

use super::transport::{Transport, TransportError};
use crate::service::Dispatcher;

/// Counters reported when the input stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineWorkerStats {
    pub lines: u64,
    pub errors: u64,
}

/// Serves tasks from `transport` until end of input.
///
/// # Errors
///
/// Returns the transport error if a response line cannot be written or the
/// input stream fails.
pub async fn run_line_worker<T: Transport>(
    transport: &mut T,
    dispatcher: &Dispatcher,
) -> Result<LineWorkerStats, TransportError> {
    let mut stats = LineWorkerStats::default();

    while let Some(frame) = transport.recv().await {
        stats.lines += 1;
        let response = match frame {
            Ok(bytes) => handle_line(&bytes, dispatcher).await,
            Err(e @ (TransportError::FrameTooLarge { .. } | TransportError::InvalidUtf8)) => {
                TaskResponse::error(format!("Invalid input line: {e}"), ErrorKind::Protocol)
            }
            Err(e) => return Err(e),
        };
        if !response.is_ok() {
            stats.errors += 1;
        }
        transport.send(codec::encode_line(&response).into_bytes()).await?;
    }

    tracing::info!(lines = stats.lines, errors = stats.errors, "input closed");
    Ok(stats)
}

async fn handle_line(bytes: &[u8], dispatcher: &Dispatcher) -> TaskResponse {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, kind = %ErrorKind::Protocol, "invalid input line");
            return TaskResponse::error(format!("Invalid JSON: {e}"), ErrorKind::Protocol);
        }
    };

    match TaskCall::from_payload(&value) {
        Ok(call) => dispatcher.dispatch(call).await,
        Err(e) => dispatcher.reject(&e),
    }
}
