//! Outbound queue between session producers and the transport writer.
//!
//! Task replies, pongs, and client-role requests are produced by independent
//! tokio tasks. They all go through one bounded mpsc channel whose receiver is
//! drained by the session loop, so the transport itself is only ever touched
//! by a single owner.

use std::time::Duration;

use tokio::sync::mpsc;

/// Message to be written to the transport by the session loop.
#[derive(Debug)]
pub enum OutboundMessage {
    /// An encoded envelope (or response line on the line-stream binding).
    Frame(Vec<u8>),
    /// Ask the session loop to close the transport.
    Close(Option<String>),
}

/// Error returned when enqueueing an outbound message fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The queue stayed full for the whole send timeout.
    #[error("outbound queue full for the entire send timeout")]
    Timeout,
    /// The session loop is gone; the receiver was dropped.
    #[error("session loop has stopped")]
    Disconnected,
    /// The queue is full (non-blocking `try_send` only).
    #[error("outbound queue full")]
    Full,
}

/// Sender side of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl OutboundHandle {
    /// Creates a bounded outbound queue, returning the handle and the receiver
    /// to be drained by the session loop.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// `SendError::Full` if the queue has no room, `SendError::Disconnected`
    /// if the session loop has exited.
    pub fn try_send(&self, msg: OutboundMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Enqueues a message, waiting up to `timeout` for room.
    ///
    /// # Errors
    ///
    /// `SendError::Timeout` if the queue stays full for the whole timeout,
    /// `SendError::Disconnected` if the session loop has exited.
    pub async fn send_timeout(
        &self,
        msg: OutboundMessage,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Returns `false` once the session loop has dropped the receiver.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_timeout_delivers_in_order() {
        let (handle, mut rx) = OutboundHandle::channel(4);
        handle
            .send_timeout(OutboundMessage::Frame(b"a".to_vec()), Duration::from_secs(1))
            .await
            .unwrap();
        handle
            .send_timeout(OutboundMessage::Frame(b"b".to_vec()), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(OutboundMessage::Frame(f)) if f == b"a"));
        assert!(matches!(rx.recv().await, Some(OutboundMessage::Frame(f)) if f == b"b"));
    }

    #[test]
    fn try_send_reports_full() {
        let (handle, _rx) = OutboundHandle::channel(1);
        assert!(handle.try_send(OutboundMessage::Frame(vec![1])).is_ok());
        assert_eq!(
            handle.try_send(OutboundMessage::Frame(vec![2])),
            Err(SendError::Full)
        );
    }

    #[tokio::test]
    async fn send_timeout_when_full() {
        let (handle, _rx) = OutboundHandle::channel(1);
        handle.try_send(OutboundMessage::Close(None)).unwrap();
        let err = handle
            .send_timeout(OutboundMessage::Frame(vec![]), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Timeout);
    }

    #[tokio::test]
    async fn dropped_receiver_is_disconnected() {
        let (handle, rx) = OutboundHandle::channel(1);
        drop(rx);
        assert!(!handle.is_connected());
        let err = handle
            .send_timeout(OutboundMessage::Frame(vec![]), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Disconnected);
        assert_eq!(
            handle.try_send(OutboundMessage::Frame(vec![])),
            Err(SendError::Disconnected)
        );
    }
}
