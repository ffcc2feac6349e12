//! Duplex binding: a persistent websocket connection to the relay.
//!
//! The adapter's identity travels as the `serviceId` query parameter of the
//! endpoint URL. Frames are sent as text messages; binary messages from the
//! relay are accepted too. Websocket pings are answered by tungstenite while
//! reading, so they never reach the session.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Connector, Transport, TransportError, TransportKind};

/// Builds the endpoint URL with `serviceId=<adapter_id>` appended.
///
/// # Errors
///
/// `TransportError::InvalidUrl` if `base` does not parse.
pub fn endpoint_url(base: &str, adapter_id: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair("serviceId", adapter_id);
    Ok(url)
}

// ---------------------------------------------------------------------------
// DuplexConnector
// ---------------------------------------------------------------------------

/// Opens websocket connections to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct DuplexConnector {
    url: Url,
    connect_timeout: Duration,
}

impl DuplexConnector {
    /// # Errors
    ///
    /// `TransportError::InvalidUrl` if `base_url` does not parse.
    pub fn new(
        base_url: &str,
        adapter_id: &str,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            url: endpoint_url(base_url, adapter_id)?,
            connect_timeout,
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Transport = DuplexTransport;

    async fn open(&self) -> Result<DuplexTransport, TransportError> {
        tracing::debug!(url = %self.url, "connecting to relay");
        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| match e {
                tungstenite::Error::Io(io) => TransportError::ConnectionRefused(io.to_string()),
                other => TransportError::WebSocket(other.to_string()),
            })?;
        tracing::info!(url = %self.url, "connected to relay");
        Ok(DuplexTransport { stream })
    }
}

// ---------------------------------------------------------------------------
// DuplexTransport
// ---------------------------------------------------------------------------

/// An open websocket connection.
pub struct DuplexTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io) => TransportError::Io(io),
        other => TransportError::WebSocket(other.to_string()),
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(frame).map_err(|_| TransportError::InvalidUtf8)?;
        self.stream.send(Message::text(text)).await.map_err(ws_error)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Ok(Message::Binary(bytes)) => return Some(Ok(bytes.to_vec())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "relay closed the connection");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(ws_error(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(ws_error(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }
}
