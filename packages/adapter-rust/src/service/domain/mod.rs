//! Built-in task handler families.
//!
//! | key            | handler               |
//! |----------------|-----------------------|
//! | `math.*`       | [`ListMathHandler`]   |
//! | `calc.binary`  | [`CalculatorHandler`] |
//! | `code.execute` | [`CodeExecHandler`]   |
//! | `execute`      | [`CodeExecHandler`]   |
//! | `string.*`     | [`TextHandler`]       |
//! | `echo`         | [`EchoHandler`]       |

pub mod calc;
pub mod echo;
pub mod exec;
pub mod math;
pub mod text;

use std::sync::Arc;

pub use calc::CalculatorHandler;
pub use echo::EchoHandler;
pub use exec::CodeExecHandler;
pub use math::ListMathHandler;
pub use text::TextHandler;

use super::registry::{HandlerRegistry, RegistryError};
use crate::config::AdapterConfig;

/// Registry with every built-in handler.
///
/// # Errors
///
/// Only on a conflicting key, which cannot happen for the built-in table.
pub fn default_registry(config: &AdapterConfig) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    let exec = Arc::new(CodeExecHandler::new(config.execution.clone()));

    registry.register_prefix("math.", Arc::new(ListMathHandler))?;
    registry.register("calc.binary", Arc::new(CalculatorHandler))?;
    registry.register("code.execute", exec.clone())?;
    registry.register("execute", exec)?;
    registry.register_prefix("string.", Arc::new(TextHandler))?;
    registry.register("echo", Arc::new(EchoHandler))?;

    tracing::debug!(keys = ?registry.keys(), "handler registry built");
    Ok(registry)
}
