//! Binary calculator (`calc.binary`): `a <op> b` over two numbers.

use async_trait::async_trait;
use meshlink_core::{TaskCall, TaskError, TaskResponse};
use serde_json::{json, Value};

use crate::service::operation::{as_number, BinaryOp, TaskRequest};
use crate::service::registry::{unexpected_request, TaskHandler};

#[derive(Debug, Default)]
pub struct CalculatorHandler;

/// Operator text for error messages: strings verbatim, anything else as JSON.
fn op_display(op: Option<&Value>) -> String {
    match op {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

/// Evaluates `a <op> b`.
///
/// `mod` follows floored division, so the result takes the sign of `b`.
///
/// # Errors
///
/// `TaskError::Computation` on a zero divisor or a non-finite result.
pub fn evaluate(op: BinaryOp, a: f64, b: f64) -> Result<f64, TaskError> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(TaskError::computation("Division by zero"));
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(TaskError::computation("Modulo by zero"));
            }
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
    };
    if result.is_finite() {
        Ok(result)
    } else {
        Err(TaskError::computation("Result is not a finite number"))
    }
}

#[async_trait]
impl TaskHandler for CalculatorHandler {
    fn name(&self) -> &'static str {
        "calc"
    }

    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError> {
        let args = &call.args;
        let (Some(a), Some(b)) = (
            args.get("a").and_then(as_number),
            args.get("b").and_then(as_number),
        ) else {
            return Err(TaskError::validation(
                "Calculator inputs a and b must be numeric",
            ));
        };

        let raw = args.get("op");
        let op = raw
            .and_then(Value::as_str)
            .and_then(BinaryOp::parse)
            .ok_or_else(|| {
                TaskError::computation(format!(
                    "Unknown calculator operator: {}",
                    op_display(raw)
                ))
            })?;
        let op_name = raw
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(TaskRequest::Binary { op, op_name, a, b })
    }

    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        let TaskRequest::Binary { op, op_name, a, b } = request else {
            return Err(unexpected_request(self.name(), &request));
        };
        let result = evaluate(op, a, b)?;
        tracing::trace!(a, b, op = op.symbol(), result, "calculated");
        Ok(TaskResponse::ok(json!(result))
            .with_kind("calc")
            .with_operation("calculator")
            .with_extra("op", op_name)
            .with_extra("a", a)
            .with_extra("b", b))
    }
}
