//! Transports, session lifecycle, correlation, and shutdown control.

pub mod connection;
pub mod correlation;
pub mod line_worker;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use connection::{OutboundHandle, OutboundMessage, SendError};
pub use correlation::{CorrelationError, CorrelationTracker, PendingReply};
pub use line_worker::{run_line_worker, LineWorkerStats};
pub use reconnect::run_with_reconnect;
pub use session::{
    register_envelope, subscribe_envelope, RequestError, Session, SessionError, SessionExit,
    SessionHandle, SessionState,
};
pub use shutdown::{ShutdownController, TaskGuard};
pub use transport::{
    Connector, DuplexConnector, DuplexTransport, LineTransport, MemoryConnector, MemoryPeer,
    MemoryTransport, RequestReplyTransport, Transport, TransportError, TransportKind,
};
