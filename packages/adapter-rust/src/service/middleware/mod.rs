//! Tower middleware layers for the task pipeline.
//!
//! - [`timeout`]: Per-task deadline enforcement
//! - [`metrics`]: Task timing and outcome via `tracing` spans
//! - [`pipeline`]: Composes the layers around the `TaskRouter`

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_task_pipeline, TaskPipeline};
pub use timeout::TimeoutLayer;
