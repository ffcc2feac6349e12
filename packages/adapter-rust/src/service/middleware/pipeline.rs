//! Pipeline composition: wraps the `TaskRouter` in the middleware layers.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::config::DispatchConfig;
use crate::service::router::TaskRouter;

/// The assembled task pipeline. Cheap to clone; each task clones it and
/// drives it with `oneshot`.
pub type TaskPipeline = TimeoutService<MetricsService<TaskRouter>>;

/// Builds the task pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `TimeoutLayer` -- enforce the task deadline
/// 2. `MetricsLayer` -- record timing and outcome (closest to the handler)
#[must_use]
pub fn build_task_pipeline(router: TaskRouter, config: &DispatchConfig) -> TaskPipeline {
    ServiceBuilder::new()
        .layer(TimeoutLayer::new(config.task_timeout))
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
