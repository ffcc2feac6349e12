//! Request/reply binding: one HTTP POST per envelope.
//!
//! The request body is the encoded envelope and the response body is the
//! reply. Nothing is kept between calls apart from the pooled HTTP client.
//! Through the [`Transport`] trait, `send` performs the call and queues the
//! reply so the next `recv` yields it; `recv` with nothing queued reports the
//! end of the stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::{Transport, TransportError, TransportKind};

/// Longest error body kept in [`TransportError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// POSTs frames to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct RequestReplyTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    replies: VecDeque<Vec<u8>>,
}

impl RequestReplyTransport {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
            replies: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one frame and returns the reply body.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if no reply arrives within the timeout
    /// - `TransportError::ConnectionRefused` if the endpoint cannot be reached
    /// - `TransportError::Status` on a non-2xx answer
    pub async fn call(&self, frame: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(frame)
            .send()
            .await
            .map_err(|e| self.http_error(&e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.http_error(&e))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        tracing::debug!(
            url = %self.url,
            status = status.as_u16(),
            bytes = body.len(),
            "request/reply call complete"
        );
        Ok(body.to_vec())
    }

    fn http_error(&self, e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::ConnectionRefused(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for RequestReplyTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let reply = self.call(frame).await?;
        self.replies.push_back(reply);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.replies.pop_front().map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.replies.clear();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::RequestReply
    }
}
