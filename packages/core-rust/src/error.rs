//! Error taxonomy shared by every adapter component.
//!
//! Six classes of failure exist on the wire and in logs. Only three of them
//! (`Validation`, `Computation`, `Execution`) are ever produced by task
//! handlers; they are carried by [`TaskError`] and always end up as an
//! `error`-status response. Decode failures are carried by [`DecodeError`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classification of a failure, serialized as `error_kind` on error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed envelope or input line.
    #[serde(rename = "ProtocolError")]
    Protocol,
    /// Traffic reached the wrong layer (control-plane vs. task).
    #[serde(rename = "RoutingError")]
    Routing,
    /// Missing, non-numeric, or malformed task fields.
    #[serde(rename = "ValidationError")]
    Validation,
    /// Arithmetic failure or unknown operator/task key.
    #[serde(rename = "ComputationError")]
    Computation,
    /// Handler-internal failure, including failures of executed code.
    #[serde(rename = "ExecutionError")]
    Execution,
    /// Connection refused, send failure, or timeout.
    #[serde(rename = "TransportError")]
    Transport,
}

impl ErrorKind {
    /// Returns the wire name of this kind (e.g. `"ValidationError"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "ProtocolError",
            Self::Routing => "RoutingError",
            Self::Validation => "ValidationError",
            Self::Computation => "ComputationError",
            Self::Execution => "ExecutionError",
            Self::Transport => "TransportError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// Failure produced while validating or executing a task.
///
/// The message is what ends up in the `error` field of the response, so it is
/// kept short and human readable (e.g. `"Division by zero"`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Computation(String),
    #[error("{0}")]
    Execution(String),
}

impl TaskError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Computation(_) => ErrorKind::Computation,
            Self::Execution(_) => ErrorKind::Execution,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m) | Self::Computation(m) | Self::Execution(m) => m,
        }
    }
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Failure to turn inbound bytes into an [`Envelope`](crate::Envelope).
///
/// Always classified as [`ErrorKind::Protocol`]. Callers log it and drop the
/// offending message; it is never fatal to a session.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input is not syntactically valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    /// The input parsed, but the top-level value is not an object.
    #[error("envelope must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    /// A required routing field is absent or not a string.
    #[error("envelope is missing required field `{0}`")]
    MissingField(&'static str),
    /// The object has the required fields but a field has the wrong shape.
    #[error("envelope field has an unexpected shape: {0}")]
    Schema(#[source] serde_json::Error),
}

impl DecodeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}
