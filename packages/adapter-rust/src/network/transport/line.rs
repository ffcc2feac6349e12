//! Line-stream binding: one frame per `\n`-terminated line.
//!
//! Used by the stdio worker, where stdin carries `{task_name, data}` objects
//! and stdout carries one response object per line. Nothing else may write to
//! the output stream; logs go to stderr.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::{Transport, TransportError, TransportKind};

/// Line-delimited frames over an async reader/writer pair.
#[derive(Debug)]
pub struct LineTransport<R, W> {
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    max_line_length: usize,
    /// `FramedRead` yields one `None` after a decode error before resuming.
    resume_after_error: bool,
}

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Binds to the process's stdin and stdout.
    #[must_use]
    pub fn stdio(max_line_length: usize) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), max_line_length)
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Lines longer than `max_line_length` bytes are reported as
    /// [`TransportError::FrameTooLarge`] and skipped.
    pub fn new(reader: R, writer: W, max_line_length: usize) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            max_line_length,
            resume_after_error: false,
        }
    }

    /// Writes one line of text. A trailing newline is appended.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the writer fails.
    pub async fn send_line(&mut self, line: String) -> Result<(), TransportError> {
        let result = self.writer.send(line).await;
        result.map_err(|e| self.codec_error(e))
    }

    fn codec_error(&self, e: LinesCodecError) -> TransportError {
        match e {
            LinesCodecError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => {
                TransportError::InvalidUtf8
            }
            LinesCodecError::Io(io) => TransportError::Io(io),
            LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLarge {
                max: self.max_line_length,
            },
        }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let line = String::from_utf8(frame).map_err(|_| TransportError::InvalidUtf8)?;
        self.send_line(line).await
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            let item = match self.reader.next().await {
                Some(item) => item,
                None if std::mem::take(&mut self.resume_after_error) => continue,
                None => return None,
            };
            match item {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => return Some(Ok(line.into_bytes())),
                Err(e) => {
                    let err = self.codec_error(e);
                    // the offending line was consumed; later lines are still readable
                    self.resume_after_error = matches!(
                        err,
                        TransportError::FrameTooLarge { .. } | TransportError::InvalidUtf8
                    );
                    return Some(Err(err));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let result = SinkExt::<String>::close(&mut self.writer).await;
        result.map_err(|e| self.codec_error(e))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Line
    }
}
