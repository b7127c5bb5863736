//! Cluster Frame Decoder

use bytes::{Buf, Bytes, BytesMut};

use super::{read_bool, read_i32, read_string};
use crate::protocol::{ClusterMessage, DecodeError, DATA, HEADER, HELLO, MAX_DATA_LENGTH};

/// Cluster Frame Decoder
///
/// Decodes from the front of a buffer without consuming it. Callers advance
/// their buffer by the returned length. `Ok(None)` means the frame is not
/// complete yet.
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum accepted data payload
    max_data_length: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_data_length: MAX_DATA_LENGTH,
        }
    }

    pub fn with_max_data_length(mut self, len: usize) -> Self {
        self.max_data_length = len.min(MAX_DATA_LENGTH);
        self
    }

    /// Decode the connection handshake
    /// Returns (sender address, bytes_consumed)
    pub fn decode_hello(&self, buf: &[u8]) -> Result<Option<(String, usize)>, DecodeError> {
        incomplete_as_none(self.try_decode_hello(buf))
    }

    /// Decode one cluster message
    /// Returns (message, bytes_consumed)
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(ClusterMessage, usize)>, DecodeError> {
        incomplete_as_none(self.try_decode(buf))
    }

    /// Decode one cluster message and consume it from `buf`.
    ///
    /// Data payloads are split off `buf` and share its allocation.
    pub fn decode_frame(&self, buf: &mut BytesMut) -> Result<Option<ClusterMessage>, DecodeError> {
        match read_i32(&buf[..]) {
            Ok(DATA) => {}
            Ok(_) => {
                return Ok(self.decode(&buf[..])?.map(|(message, len)| {
                    buf.advance(len);
                    message
                }));
            }
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        }

        match self.data_length(&buf[4..]) {
            Ok(length) if buf.len() >= 8 + length => {
                buf.advance(8);
                Ok(Some(ClusterMessage::Data(buf.split_to(length).freeze())))
            }
            Ok(_) | Err(DecodeError::InsufficientData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_decode_hello(&self, buf: &[u8]) -> Result<(String, usize), DecodeError> {
        let key = read_i32(buf)?;
        if key != HELLO {
            return Err(DecodeError::InvalidHello(key));
        }
        let (address, len) = read_string(&buf[4..])?;
        Ok((address.to_string(), 4 + len))
    }

    fn try_decode(&self, buf: &[u8]) -> Result<(ClusterMessage, usize), DecodeError> {
        let key = read_i32(buf)?;
        let body = &buf[4..];

        let (message, len) = match key {
            DATA => self.decode_data(body)?,
            HEADER => self.decode_header(body)?,
            _ => return Err(DecodeError::InvalidMessageKey(key)),
        };

        Ok((message, 4 + len))
    }

    /// Validated payload length from a data body
    fn data_length(&self, body: &[u8]) -> Result<usize, DecodeError> {
        let length = read_i32(body)?;
        // Reject before waiting for (or allocating) the body
        if length < 0 || length as usize > self.max_data_length {
            return Err(DecodeError::MessageTooLarge(length));
        }
        Ok(length as usize)
    }

    fn decode_data(&self, body: &[u8]) -> Result<(ClusterMessage, usize), DecodeError> {
        let total_len = 4 + self.data_length(body)?;
        if body.len() < total_len {
            return Err(DecodeError::InsufficientData);
        }

        let payload = Bytes::copy_from_slice(&body[4..total_len]);
        Ok((ClusterMessage::Data(payload), total_len))
    }

    fn decode_header(&self, body: &[u8]) -> Result<(ClusterMessage, usize), DecodeError> {
        let mut pos = 0;

        let (address, len) = read_string(&body[pos..])?;
        pos += len;

        let joining = read_bool(&body[pos..])?;
        pos += 1;

        let (identity, len) = read_string(&body[pos..])?;
        pos += len;

        let message = ClusterMessage::Membership {
            address: address.to_string(),
            joining,
            identity: identity.to_string(),
        };
        Ok((message, pos))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn incomplete_as_none<T>(result: Result<(T, usize), DecodeError>) -> Result<Option<(T, usize)>, DecodeError> {
    match result {
        Ok(decoded) => Ok(Some(decoded)),
        Err(DecodeError::InsufficientData) => Ok(None),
        Err(e) => Err(e),
    }
}
