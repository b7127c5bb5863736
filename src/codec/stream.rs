//! Socket framing
//!
//! Pulls complete frames off an async byte stream. Partial reads are
//! buffered until the decoder sees a whole frame.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Decoder;
use crate::protocol::{ClusterMessage, DecodeError};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 8 * 1024;

/// Errors from reading frames off a stream
#[derive(Debug)]
pub enum FrameError {
    /// Stream closed cleanly between frames
    Eof,
    /// No data arrived within the read timeout
    Timeout,
    /// IO error (a stream closed mid-frame reports `UnexpectedEof`)
    Io(io::Error),
    /// Malformed frame
    Decode(DecodeError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "end of stream"),
            Self::Timeout => write!(f, "timeout waiting for message"),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl From<DecodeError> for FrameError {
    fn from(e: DecodeError) -> Self {
        FrameError::Decode(e)
    }
}

/// Reads HELLO and cluster messages from a stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: Decoder,
    /// Per-read timeout, `None` waits forever
    read_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: Decoder::new(),
            read_timeout: None,
        }
    }

    /// Bound each read; a zero duration disables the timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Read the one-time connection handshake, returning the sender address
    pub async fn read_hello(&mut self) -> Result<String, FrameError> {
        loop {
            if let Some((address, len)) = self.decoder.decode_hello(&self.buf)? {
                self.buf.advance(len);
                return Ok(address);
            }
            self.fill().await?;
        }
    }

    /// Read the next complete cluster message
    pub async fn read_message(&mut self) -> Result<ClusterMessage, FrameError> {
        loop {
            if let Some(message) = self.decoder.decode_frame(&mut self.buf)? {
                return Ok(message);
            }
            self.fill().await?;
        }
    }

    /// Bytes received but not yet consumed by a decoded frame
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self) -> Result<(), FrameError> {
        self.buf.reserve(READ_CHUNK);
        let read = self.inner.read_buf(&mut self.buf);
        let n = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| FrameError::Timeout)??,
            None => read.await?,
        };

        if n == 0 {
            if self.buf.is_empty() {
                return Err(FrameError::Eof);
            }
            return Err(FrameError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed with {} bytes of partial frame", self.buf.len()),
            )));
        }
        Ok(())
    }
}

/// Write an encoded frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
