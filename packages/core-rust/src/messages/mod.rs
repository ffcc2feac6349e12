//! Wire schemas for the adapter protocol.
//!
//! - [`envelope`]: the routing envelope every transport carries
//! - [`task`]: the `invoke` payload and the structured task response

pub mod envelope;
pub mod task;

pub use envelope::{
    intents, new_trace_id, utc_timestamp, Envelope, Meta, ProtocolVersion, CONTROL_VERSION,
    KERNEL_TARGET, LEGACY_VERSION,
};
pub use task::{ResponseMeta, TaskCall, TaskResponse, TaskStatus};
