//! Task classification, routing, and execution.
//!
//! The task pipeline:
//!
//! 1. **Classification** (`classify`): `Envelope` -> task, ping, or skipped traffic
//! 2. **Middleware** (`middleware`): Tower layers (timeout, metrics)
//! 3. **Routing** (`router`): dispatch to a handler family by `task_name`
//! 4. **Handlers** (`domain`): list math, calculator, strings, code execution, echo
//! 5. **Responses** (`response`): timing, identity, and the reply envelope

pub mod classify;
pub mod dispatch;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod response;
pub mod router;

pub use classify::{classify, Classified};
pub use dispatch::Dispatcher;
pub use domain::default_registry;
pub use operation::{BinaryOp, ListOp, TaskRequest, TextOp};
pub use registry::{HandlerRegistry, RegistryError, TaskHandler};
pub use response::ResponseBuilder;
pub use router::TaskRouter;
