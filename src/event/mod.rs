//! Application Events
//!
//! The cluster carries events as opaque bytes. The host supplies an
//! [`EventCodec`] that turns its events into bytes and applies received
//! ones locally.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Error converting an event to or from bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Event could not be serialized
    Serialize(String),
    /// Bytes could not be turned back into an event
    Deserialize(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize(e) => write!(f, "serialization error: {}", e),
            Self::Deserialize(e) => write!(f, "deserialization error: {}", e),
        }
    }
}

impl std::error::Error for EventError {}

/// Host-side event serialization and local application
pub trait EventCodec: Send + Sync + 'static {
    /// Event type produced and consumed by the host
    type Event: Send + Sync;

    /// Convert an outgoing event to bytes
    fn serialize(&self, event: &Self::Event) -> Result<Bytes, EventError>;

    /// Convert received bytes back into an event
    fn deserialize(&self, data: Bytes) -> Result<Self::Event, EventError>;

    /// Apply a received event locally
    fn dispatch(&self, event: Self::Event);
}

/// Callback for events received from cluster peers
pub type InboundCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Codec for hosts whose events already are bytes
#[derive(Clone)]
pub struct RawEventCodec {
    inbound: InboundCallback,
}

impl RawEventCodec {
    pub fn new(inbound: InboundCallback) -> Self {
        Self { inbound }
    }
}

impl EventCodec for RawEventCodec {
    type Event = Bytes;

    fn serialize(&self, event: &Bytes) -> Result<Bytes, EventError> {
        Ok(event.clone())
    }

    fn deserialize(&self, data: Bytes) -> Result<Bytes, EventError> {
        Ok(data)
    }

    fn dispatch(&self, event: Bytes) {
        (self.inbound)(event)
    }
}
