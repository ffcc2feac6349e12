//! Handler registry: maps dispatch keys to task handlers.
//!
//! Keys are matched exactly first (`calc.binary`, `echo`), then by the
//! longest registered prefix (`math.` selects the list-math family, which
//! then picks the operation from the key's suffix). The registry is built
//! once before the session starts and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meshlink_core::{TaskCall, TaskError, TaskResponse};

use super::operation::TaskRequest;

// ---------------------------------------------------------------------------
// TaskHandler trait
// ---------------------------------------------------------------------------

/// A family of task operations.
///
/// `decode` validates the raw call into a typed request; `handle` performs
/// the work. Handlers never see envelopes, and their errors always become an
/// `error`-status response rather than ending the session.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Family name, used in logs.
    fn name(&self) -> &'static str;

    /// Validates `call.args` for this family.
    ///
    /// # Errors
    ///
    /// `TaskError::Validation` for missing or malformed fields,
    /// `TaskError::Computation` for an unknown operation.
    fn decode(&self, call: &TaskCall) -> Result<TaskRequest, TaskError>;

    /// Runs a request produced by this handler's `decode`.
    ///
    /// The returned response only needs the handler-specific fields
    /// (`result`, `kind`, echoes); timing and identity are added later.
    async fn handle(&self, request: TaskRequest) -> Result<TaskResponse, TaskError>;
}

/// Error for a request variant a handler does not produce.
pub(crate) fn unexpected_request(handler: &str, request: &TaskRequest) -> TaskError {
    TaskError::execution(format!(
        "{handler} handler cannot run a {} request",
        request.family()
    ))
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a handler is already registered for key `{0}`")]
    DuplicateKey(String),
    #[error("a handler is already registered for prefix `{0}`")]
    DuplicatePrefix(String),
}

/// Dispatch-key to handler mapping.
#[derive(Default)]
pub struct HandlerRegistry {
    exact: HashMap<String, Arc<dyn TaskHandler>>,
    /// Kept sorted by descending prefix length so the first match is the longest.
    prefixes: Vec<(String, Arc<dyn TaskHandler>)>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for exactly `key`.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateKey` if `key` is taken.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.exact.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        tracing::debug!(key = %key, handler = handler.name(), "registered task handler");
        self.exact.insert(key, handler);
        Ok(())
    }

    /// Registers `handler` for every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicatePrefix` if `prefix` is taken.
    pub fn register_prefix(
        &mut self,
        prefix: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let prefix = prefix.into();
        if self.prefixes.iter().any(|(p, _)| *p == prefix) {
            return Err(RegistryError::DuplicatePrefix(prefix));
        }
        tracing::debug!(
            prefix = %prefix,
            handler = handler.name(),
            "registered task handler prefix"
        );
        self.prefixes.push((prefix, handler));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(())
    }

    /// Finds the handler for `key`: exact match first, then longest prefix.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Arc<dyn TaskHandler>> {
        if let Some(handler) = self.exact.get(key) {
            return Some(Arc::clone(handler));
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Registered keys, with prefixes shown as `prefix*`, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .exact
            .keys()
            .cloned()
            .chain(self.prefixes.iter().map(|(p, _)| format!("{p}*")))
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
