//! Transport bindings.
//!
//! Every binding moves opaque byte frames (one encoded envelope, or one line
//! on the line-stream binding) and presents the same [`Transport`] contract to
//! the session. `send` and `recv` fail independently: a failed send leaves the
//! receive side (and any correlation state above it) untouched.
//!
//! - [`duplex`]: persistent websocket connection to the relay
//! - [`request_reply`]: one HTTP POST per envelope
//! - [`line`]: newline-delimited frames over any async reader/writer pair (stdio)
//! - [`memory`]: in-process channel pair, used by tests and embedders

pub mod duplex;
pub mod line;
pub mod memory;
pub mod request_reply;

use std::time::Duration;

use async_trait::async_trait;
use meshlink_core::ErrorKind;

pub use duplex::{DuplexConnector, DuplexTransport};
pub use line::LineTransport;
pub use memory::{MemoryConnector, MemoryPeer, MemoryTransport};
pub use request_reply::RequestReplyTransport;

use super::connection::SendError;

/// Failure of a transport operation. Always classified as
/// [`ErrorKind::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("peer answered with non-success status {status}")]
    Status { status: u16, body: String },
    #[error("connection closed")]
    Closed,
    /// A send was attempted while the session is not connected.
    #[error("session is not connected")]
    NotConnected,
    #[error("frame exceeds the maximum length of {max} bytes")]
    FrameTooLarge { max: usize },
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Queue(#[from] SendError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }

    /// `true` for errors after which the same frame could be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Queue(SendError::Timeout | SendError::Full)
        )
    }
}

/// Which binding a transport implements. Used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Duplex,
    RequestReply,
    Line,
    Memory,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplex => "duplex",
            Self::RequestReply => "request_reply",
            Self::Line => "line",
            Self::Memory => "memory",
        }
    }
}

/// An open connection that moves byte frames.
///
/// `recv` must be cancel safe: the session polls it inside `select!`
/// alongside its outbound queue and shutdown signal.
#[async_trait]
pub trait Transport: Send {
    /// Writes one frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Reads the next frame. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Closes the connection from this side.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn kind(&self) -> TransportKind;
}

/// Opens transports. A session calls `open` once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    async fn open(&self) -> Result<Self::Transport, TransportError>;
}
