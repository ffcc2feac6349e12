//! Client role: building envelopes and talking to the relay directly.
//!
//! [`KernelClient`] covers the one-shot paths (a single request/reply call,
//! or a duplex connector for a session). Long-lived request/response traffic
//! over the duplex binding goes through a [`SessionHandle`](crate::network::SessionHandle).

use meshlink_core::{codec, new_trace_id, DecodeError, Envelope, ErrorKind};
use serde_json::Value;

use crate::config::AdapterConfig;
use crate::network::transport::{DuplexConnector, RequestReplyTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The reply body was not an envelope.
    #[error("invalid reply: {0}")]
    Decode(#[from] DecodeError),
}

impl ClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Decode(e) => e.kind(),
        }
    }
}

/// Envelope factory and request/reply client for one adapter identity.
#[derive(Debug, Clone)]
pub struct KernelClient {
    source: String,
    version: &'static str,
    ws_url: String,
    connect_timeout: std::time::Duration,
    http: RequestReplyTransport,
}

impl KernelClient {
    #[must_use]
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            source: config.adapter_id.clone(),
            version: config.version(),
            ws_url: config.kernel_ws_url.clone(),
            connect_timeout: config.connection.connect_timeout,
            http: RequestReplyTransport::new(
                config.kernel_http_url.clone(),
                config.connection.request_timeout,
            ),
        }
    }

    /// Builds an envelope from this client with a fresh trace id.
    #[must_use]
    pub fn create_message(
        &self,
        target: &str,
        intent: &str,
        payload: Value,
        correlation_id: Option<&str>,
    ) -> Envelope {
        let envelope = Envelope::new(self.version, self.source.as_str(), target, intent, payload)
            .with_trace_id(new_trace_id());
        match correlation_id {
            Some(id) => envelope.with_correlation_id(id),
            None => envelope,
        }
    }

    /// Posts one envelope and decodes the reply.
    ///
    /// # Errors
    ///
    /// `ClientError::Transport` for refused connections, timeouts, and
    /// non-2xx answers; `ClientError::Decode` if the reply is not an envelope.
    pub async fn send_http(&self, envelope: &Envelope) -> Result<Envelope, ClientError> {
        let reply = self.http.call(codec::encode(envelope)).await.map_err(|e| {
            tracing::warn!(
                url = self.http.url(),
                trace_id = envelope.trace_id().unwrap_or(""),
                error = %e,
                "request/reply call failed"
            );
            e
        })?;
        Ok(codec::decode(&reply)?)
    }

    /// Connector for a duplex session under this client's identity.
    ///
    /// # Errors
    ///
    /// `TransportError::InvalidUrl` if the configured websocket URL is invalid.
    pub fn duplex_connector(&self) -> Result<DuplexConnector, TransportError> {
        DuplexConnector::new(&self.ws_url, &self.source, self.connect_timeout)
    }
}
