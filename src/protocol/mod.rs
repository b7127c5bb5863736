//! Cluster Wire Protocol
//!
//! Message types exchanged between peers over TCP. Every frame starts with
//! a 4-byte big-endian key identifying what follows.
//!
//! | Key | Body |
//! |-----|------|
//! | `HELLO` (182) | UTF string: sender address (once per connection) |
//! | `HEADER` (11) | UTF string address, 1-byte join flag, UTF string identity |
//! | `DATA` (12) | i32 length (at most 10 MiB), raw bytes |

mod error;
mod message;

pub use error::{DecodeError, EncodeError};
pub use message::ClusterMessage;

/// Identifies a client on connection initiation.
pub const HELLO: i32 = 182;

/// Membership header frame.
pub const HEADER: i32 = 11;

/// Opaque data frame.
pub const DATA: i32 = 12;

/// Largest accepted data payload (10 MiB)
pub const MAX_DATA_LENGTH: usize = 10 * 1024 * 1024;

/// Largest encodable UTF string (u16 length prefix)
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;
