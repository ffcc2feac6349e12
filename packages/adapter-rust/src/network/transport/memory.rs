//! In-process transport over a pair of mpsc channels.
//!
//! [`pair`] returns the adapter side (a [`MemoryTransport`]) and the relay
//! side (a [`MemoryPeer`]). Dropping the peer looks like the relay closing
//! the connection.

use std::collections::VecDeque;

use async_trait::async_trait;
use meshlink_core::{codec, Envelope};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Transport, TransportError, TransportKind};

const DEFAULT_CAPACITY: usize = 64;

/// Creates a connected transport/peer pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_adapter) = mpsc::channel(DEFAULT_CAPACITY);
    let (to_adapter, from_peer) = mpsc::channel(DEFAULT_CAPACITY);
    (
        MemoryTransport {
            tx: Some(to_peer),
            rx: from_peer,
        },
        MemoryPeer {
            tx: to_adapter,
            rx: from_adapter,
        },
    )
}

/// Adapter side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        if self.tx.is_none() {
            return None;
        }
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }
}

/// Relay side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Delivers an envelope to the adapter.
    ///
    /// # Errors
    ///
    /// `TransportError::Closed` if the adapter side is gone.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send_raw(codec::encode(envelope)).await
    }

    /// Delivers raw bytes to the adapter, e.g. a deliberately malformed frame.
    ///
    /// # Errors
    ///
    /// `TransportError::Closed` if the adapter side is gone.
    pub async fn send_raw(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Next frame written by the adapter, or `None` once it closed.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next frame written by the adapter, decoded. Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.rx.recv().await?;
            match codec::decode(&frame) {
                Ok(env) => return Some(env),
                Err(e) => tracing::warn!(error = %e, "memory peer dropped undecodable frame"),
            }
        }
    }
}

/// Hands out pre-built memory transports, one per `open` call.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    queue: Mutex<VecDeque<MemoryTransport>>,
}

impl MemoryConnector {
    pub fn new(transports: impl IntoIterator<Item = MemoryTransport>) -> Self {
        Self {
            queue: Mutex::new(transports.into_iter().collect()),
        }
    }

    pub fn push(&self, transport: MemoryTransport) {
        self.queue.lock().push_back(transport);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn open(&self) -> Result<MemoryTransport, TransportError> {
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| {
                TransportError::ConnectionRefused("no memory transport available".to_string())
            })
    }
}
