//! Cluster Frame Codec
//!
//! Buffer-level encoding and decoding of cluster frames, plus an async
//! reader that pulls complete frames off a socket.

mod decode;
mod encode;
mod stream;

#[cfg(test)]
mod tests;

pub use decode::Decoder;
pub use encode::Encoder;
pub use stream::{write_frame, FrameError, FrameReader};

use bytes::{BufMut, BytesMut};

use crate::protocol::{DecodeError, EncodeError, MAX_STRING_LENGTH};

/// Read a Four Byte Integer (i32 big-endian)
#[inline]
pub fn read_i32(buf: &[u8]) -> Result<i32, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::InsufficientData);
    }
    Ok(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Read a one byte boolean (any non-zero value is true)
#[inline]
pub fn read_bool(buf: &[u8]) -> Result<bool, DecodeError> {
    buf.first()
        .map(|b| *b != 0)
        .ok_or(DecodeError::InsufficientData)
}

/// Read a u16 length-prefixed UTF-8 string
/// Returns (string, bytes_consumed) or error
#[inline]
pub fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let total_len = 2 + len;

    if buf.len() < total_len {
        return Err(DecodeError::InsufficientData);
    }

    let s = std::str::from_utf8(&buf[2..total_len]).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s, total_len))
}

/// Write a u16 length-prefixed UTF-8 string
#[inline]
pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    let len = s.len();
    if len > MAX_STRING_LENGTH {
        return Err(EncodeError::StringTooLong(len));
    }
    buf.put_u16(len as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}
