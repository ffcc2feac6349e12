//! List math family (`math.<op>`): folds over an ordered list of numbers.
//!
//! Empty-input behavior is part of the wire contract: `sum` is 0, `product`
//! is 1, `average`/`min`/`max`/`subtract` are 0, and `divide` is an error.

use async_trait::async_trait;
use meshlink_core::{TaskCall, TaskError, TaskResponse};
use serde_json::{json, Value};

use crate::service::operation::{as_number, ListOp, TaskRequest};
use crate::service::registry::{unexpected_request, TaskHandler};

/// Handler registered for the `math.` prefix.
#[derive(Debug, Default)]
pub struct ListMathHandler;

/// Reads `inputs` as a list of finite numbers. Absent means empty.
fn numeric_inputs(args: &Value) -> Result<Vec<f64>, TaskError> {
    let invalid = || TaskError::validation("Inputs must be numeric");
    match args.get("inputs") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| as_number(v).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

/// Applies `op` to `values`.
///
/// # Errors
///
/// `TaskError::Computation` for division by zero, empty division input, or a
/// non-finite result.
pub fn fold(op: ListOp, values: &[f64]) -> Result<f64, TaskError> {
    let result = match op {
        ListOp::Sum => values.iter().fold(0.0, |acc, v| acc + v),
        ListOp::Product => values.iter().fold(1.0, |acc, v| acc * v),
        ListOp::Average => {
            if values.is_empty() {
                0.0
            } else {
                #[allow(clippy::cast_precision_loss)]
                let len = values.len() as f64;
                values.iter().fold(0.0, |acc, v| acc + v) / len
            }
        }
        ListOp::Min => values.iter().copied().reduce(f64::min).unwrap_or(0.0),
        ListOp::Max => values.iter().copied().reduce(f64::max).unwrap_or(0.0),
        ListOp::Subtract => match values.split_first() {
            Some((first, rest)) => rest.iter().fold(*first, |acc, v| acc - v),
            None => 0.0,
        },
        ListOp::Divide => {
            let Some((first, rest)) = values.split_first() else {
                return Err(TaskError::computation("No values provided for division"));
            };
            if rest.iter().any(|v| *v == 0.0) {
                return Err(TaskError::computation("Division by zero"));
            }
            rest.iter().fold(*first, |acc, v| acc / v)
        }
    };

    if result.is_finite() {
        Ok(result)
    } else {
        Err(TaskError::computation("Result is not a finite number"))
    }
}

#[async_trait]
impl TaskHandler for ListMathHandler {
    fn name(&self) -> &'static str {
        "math"
    }

    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError> {
        let inputs = numeric_inputs(&call.args)?;
        let op = ListOp::parse(call.suffix()).ok_or_else(|| {
            TaskError::computation(format!("Unknown math task_name: {}", call.key))
        })?;
        Ok(TaskRequest::List { op, inputs })
    }

    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        let TaskRequest::List { op, inputs } = request else {
            return Err(unexpected_request(self.name(), &request));
        };
        let result = fold(op, &inputs).map_err(|e| {
            tracing::debug!(operation = op.as_str(), error = %e, "list math failed");
            e
        })?;
        Ok(TaskResponse::ok(json!(result))
            .with_kind("list")
            .with_operation(op.as_str())
            .with_extra("inputs", json!(inputs)))
    }
}

#[cfg(test)]
mod tests {
    use meshlink_core::ErrorKind;
    use proptest::prelude::*;

    use super::*;

    async fn run(payload: Value) -> Result<TaskResponse, TaskError> {
        let call = TaskCall::from_payload(&payload).unwrap();
        let handler = ListMathHandler;
        let request = handler.decode(&call)?;
        handler.handle(request).await
    }

    #[tokio::test]
    async fn sum_echoes_inputs_and_operation() {
        let resp = run(json!({"task_name": "math.sum", "inputs": [1, 2, 3.5]}))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!(6.5)));
        assert_eq!(resp.kind.as_deref(), Some("list"));
        assert_eq!(resp.operation.as_deref(), Some("sum"));
        assert_eq!(resp.extra["inputs"], json!([1.0, 2.0, 3.5]));
    }

    #[test]
    fn empty_inputs_follow_identity_rules() {
        assert_eq!(fold(ListOp::Sum, &[]).unwrap(), 0.0);
        assert_eq!(fold(ListOp::Product, &[]).unwrap(), 1.0);
        assert_eq!(fold(ListOp::Average, &[]).unwrap(), 0.0);
        assert_eq!(fold(ListOp::Min, &[]).unwrap(), 0.0);
        assert_eq!(fold(ListOp::Max, &[]).unwrap(), 0.0);
        assert_eq!(fold(ListOp::Subtract, &[]).unwrap(), 0.0);
    }

    #[test]
    fn subtract_is_left_fold() {
        assert_eq!(fold(ListOp::Subtract, &[10.0, 3.0, 2.0]).unwrap(), 5.0);
        assert_eq!(fold(ListOp::Subtract, &[4.0]).unwrap(), 4.0);
    }

    #[test]
    fn divide_rules() {
        assert_eq!(fold(ListOp::Divide, &[7.0]).unwrap(), 7.0);
        assert_eq!(fold(ListOp::Divide, &[0.0]).unwrap(), 0.0);
        assert_eq!(fold(ListOp::Divide, &[100.0, 5.0, 2.0]).unwrap(), 10.0);

        let err = fold(ListOp::Divide, &[10.0, 2.0, 0.0]).unwrap_err();
        assert_eq!(err, TaskError::computation("Division by zero"));

        let err = fold(ListOp::Divide, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
        assert!(err.message().to_lowercase().contains("no values provided"));
    }

    #[test]
    fn min_max_average() {
        let xs = [3.0, -1.0, 4.0];
        assert_eq!(fold(ListOp::Min, &xs).unwrap(), -1.0);
        assert_eq!(fold(ListOp::Max, &xs).unwrap(), 4.0);
        assert_eq!(fold(ListOp::Average, &xs).unwrap(), 2.0);
    }

    #[tokio::test]
    async fn divide_by_zero_is_error_without_result() {
        let err = run(json!({"task_name": "math.divide", "inputs": [10, 2, 0]}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Division by zero");
    }

    #[tokio::test]
    async fn non_numeric_inputs_rejected_before_arithmetic() {
        let err = run(json!({"task_name": "math.sum", "inputs": [1, "two", 3]}))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::validation("Inputs must be numeric"));

        let err = run(json!({"task_name": "math.sum", "inputs": "123"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // validation runs before the operation lookup
        let err = run(json!({"task_name": "math.median", "inputs": [true]}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_inputs_means_empty() {
        let resp = run(json!({"task_name": "math.product"})).await.unwrap();
        assert_eq!(resp.result, Some(json!(1.0)));
    }

    #[tokio::test]
    async fn unknown_operation_names_the_key() {
        let err = run(json!({"task_name": "math.median", "inputs": [1]}))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::computation("Unknown math task_name: math.median"));
    }

    #[tokio::test]
    async fn overflow_is_computation_error() {
        let err = run(json!({"task_name": "math.product", "inputs": [1e200, 1e200]}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
    }

    proptest! {
        #[test]
        fn sum_matches_fold(xs in prop::collection::vec(-1.0e6f64..1.0e6, 1..32)) {
            let expected = xs.iter().fold(0.0, |acc, x| acc + x);
            prop_assert_eq!(fold(ListOp::Sum, &xs).unwrap(), expected);
        }

        #[test]
        fn product_matches_fold(xs in prop::collection::vec(-10.0f64..10.0, 1..16)) {
            let expected = xs.iter().fold(1.0, |acc, x| acc * x);
            prop_assert_eq!(fold(ListOp::Product, &xs).unwrap(), expected);
        }

        #[test]
        fn divide_with_any_zero_divisor_fails(
            head in -1.0e6f64..1.0e6,
            mut rest in prop::collection::vec(1.0f64..100.0, 0..8),
            at in 0usize..8,
        ) {
            let idx = at.min(rest.len());
            rest.insert(idx, 0.0);
            let mut xs = vec![head];
            xs.extend(rest);
            prop_assert!(fold(ListOp::Divide, &xs).is_err());
        }
    }
}
