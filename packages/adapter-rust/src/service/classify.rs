//! Envelope classification: decides what the session does with an inbound
//! envelope before anything reaches a handler.
//!
//! Rules, in order:
//! 1. `target == "kernel"`: control-plane traffic, never dispatched
//! 2. `ping` (any case): answered with `pong` by the session
//! 3. any intent other than `invoke`: not a task, skipped
//! 4. `invoke`: the payload must yield a dispatch key, otherwise the task is
//!    rejected with a validation error

use meshlink_core::{intents, Envelope, ErrorKind, TaskCall, TaskError};

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A dispatchable task.
    Task(TaskCall),
    /// An `invoke` whose payload has no usable dispatch key.
    Rejected(TaskError),
    Ping,
    /// Addressed to the relay's control plane.
    ControlPlane,
    /// Any other intent (`response`, `GREETING`, ...).
    NotATask,
}

impl Classified {
    /// Taxonomy class for envelopes that are not dispatched.
    ///
    /// Skipped traffic is `RoutingError` in logs only; it is never reported
    /// back to the sender.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Task(_) | Self::Ping => None,
            Self::Rejected(e) => Some(e.kind()),
            Self::ControlPlane | Self::NotATask => Some(ErrorKind::Routing),
        }
    }
}

/// Classifies an inbound envelope.
#[must_use]
pub fn classify(envelope: &Envelope) -> Classified {
    if envelope.is_control_plane() {
        return Classified::ControlPlane;
    }
    if intents::is_ping(&envelope.intent) {
        return Classified::Ping;
    }
    if envelope.intent != intents::INVOKE {
        return Classified::NotATask;
    }
    match TaskCall::from_payload(&envelope.payload) {
        Ok(call) => Classified::Task(call.with_trace_id(envelope.meta.trace_id.clone())),
        Err(e) => Classified::Rejected(e),
    }
}
