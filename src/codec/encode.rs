//! Cluster Frame Encoder

use bytes::{BufMut, BytesMut};

use super::write_string;
use crate::protocol::{
    ClusterMessage, EncodeError, DATA, HEADER, HELLO, MAX_DATA_LENGTH, MAX_STRING_LENGTH,
};

/// Cluster Frame Encoder
///
/// Validates the whole frame before writing, so a failed encode leaves the
/// buffer untouched.
#[derive(Debug, Clone)]
pub struct Encoder {
    max_data_length: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            max_data_length: MAX_DATA_LENGTH,
        }
    }

    pub fn with_max_data_length(mut self, len: usize) -> Self {
        self.max_data_length = len.min(MAX_DATA_LENGTH);
        self
    }

    /// Encode the connection handshake carrying our address
    pub fn encode_hello(&self, address: &str, buf: &mut BytesMut) -> Result<(), EncodeError> {
        check_string(address)?;
        buf.reserve(4 + 2 + address.len());
        buf.put_i32(HELLO);
        write_string(buf, address)
    }

    /// Encode a cluster message into the buffer
    pub fn encode(&self, message: &ClusterMessage, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            ClusterMessage::Data(payload) => {
                if payload.len() > self.max_data_length {
                    return Err(EncodeError::MessageTooLarge(payload.len()));
                }
                buf.reserve(8 + payload.len());
                buf.put_i32(DATA);
                buf.put_i32(payload.len() as i32);
                buf.put_slice(payload);
                Ok(())
            }
            ClusterMessage::Membership {
                address,
                joining,
                identity,
            } => {
                check_string(address)?;
                check_string(identity)?;
                buf.reserve(4 + 2 + address.len() + 1 + 2 + identity.len());
                buf.put_i32(HEADER);
                write_string(buf, address)?;
                buf.put_u8(u8::from(*joining));
                write_string(buf, identity)
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_string(s: &str) -> Result<(), EncodeError> {
    if s.len() > MAX_STRING_LENGTH {
        return Err(EncodeError::StringTooLong(s.len()));
    }
    Ok(())
}
