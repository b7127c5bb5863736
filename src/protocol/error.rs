//! Protocol error types

use std::fmt;

/// Errors that can occur during frame decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Leading key is neither HEADER nor DATA
    InvalidMessageKey(i32),
    /// First frame on a connection is not HELLO
    InvalidHello(i32),
    /// Declared data length is negative or above the maximum
    MessageTooLarge(i32),
    /// Invalid UTF-8 string
    InvalidUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidMessageKey(key) => write!(f, "invalid message key: {}", key),
            Self::InvalidHello(key) => write!(f, "invalid hello key: {}", key),
            Self::MessageTooLarge(len) => write!(f, "message data too large length: {}", len),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during frame encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// String longer than a u16 length prefix allows
    StringTooLong(usize),
    /// Data payload above the maximum
    MessageTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StringTooLong(len) => write!(f, "string too long: {} bytes", len),
            Self::MessageTooLarge(len) => write!(f, "message data too large length: {}", len),
        }
    }
}

impl std::error::Error for EncodeError {}
