//! Cluster Peer
//!
//! The outbound connection from this process to one peer. Connect, send,
//! reconnect and disconnect all take the same per-peer lock, so a frame is
//! never interleaved with another writer or torn by a reconnect.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::codec::{write_frame, Encoder};
use crate::discovery::normalize_address;
use crate::protocol::{ClusterMessage, EncodeError};

/// Error type for peer connection operations
#[derive(Debug)]
pub enum PeerError {
    /// `connect` called while a socket is already open
    AlreadyConnected,
    /// `send` called without an open socket
    NotConnected,
    /// TCP connect failed
    Connect(io::Error),
    /// Connect or write did not finish in time
    Timeout,
    /// Write failed
    Io(io::Error),
    /// Message could not be encoded
    Encode(EncodeError),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::AlreadyConnected => write!(f, "already got a socket connection"),
            PeerError::NotConnected => write!(f, "not connected"),
            PeerError::Connect(e) => write!(f, "connect failed: {}", e),
            PeerError::Timeout => write!(f, "operation timed out"),
            PeerError::Io(e) => write!(f, "IO error: {}", e),
            PeerError::Encode(e) => write!(f, "encode error: {}", e),
        }
    }
}

impl std::error::Error for PeerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerError::Connect(e) | PeerError::Io(e) => Some(e),
            PeerError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for PeerError {
    fn from(e: EncodeError) -> Self {
        PeerError::Encode(e)
    }
}

/// Status of an outbound peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No socket
    Disconnected,
    /// Socket open and HELLO sent
    Connected,
}

/// Open socket plus its scratch encode buffer
struct Link {
    stream: TcpStream,
    buf: BytesMut,
}

/// Outbound connection to one cluster peer
pub struct PeerConnection {
    /// Peer key (normalized `host:port`)
    key: String,
    /// Our address, carried in the HELLO handshake
    local_address: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    encoder: Encoder,
    state: RwLock<PeerState>,
    /// Guards all socket access
    link: Mutex<Option<Link>>,
}

impl PeerConnection {
    pub fn new(
        key: String,
        local_address: String,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            key,
            local_address,
            connect_timeout,
            write_timeout,
            encoder: Encoder::new(),
            state: RwLock::new(PeerState::Disconnected),
            link: Mutex::new(None),
        }
    }

    /// Get the peer key (also the address we connect to)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the current connection state
    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    /// Open the socket and send HELLO. Fails if a socket already exists.
    pub async fn connect(&self) -> Result<(), PeerError> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link).await
    }

    /// Connect if needed, then send the membership message.
    ///
    /// Returns false (and leaves the connection closed) on any failure.
    pub async fn register(&self, message: &ClusterMessage) -> bool {
        let mut link = self.link.lock().await;

        match self.register_locked(&mut link, message).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Peer '{}': register failed: {}", self.key, e);
                self.disconnect_locked(&mut link).await;
                false
            }
        }
    }

    async fn register_locked(
        &self,
        link: &mut Option<Link>,
        message: &ClusterMessage,
    ) -> Result<(), PeerError> {
        if link.is_none() {
            self.connect_locked(link).await?;
        }
        self.send_locked(link, message).await
    }

    /// Send a message. The state is left unchanged on failure.
    pub async fn send(&self, message: &ClusterMessage) -> Result<(), PeerError> {
        let mut link = self.link.lock().await;
        self.send_locked(&mut link, message).await
    }

    /// Drop the current socket (if any) and connect again, atomically
    pub async fn reconnect(&self) -> Result<(), PeerError> {
        let mut link = self.link.lock().await;
        self.disconnect_locked(&mut link).await;
        self.connect_locked(&mut link).await
    }

    /// Close the socket. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.disconnect_locked(&mut link).await;
    }

    async fn connect_locked(&self, link: &mut Option<Link>) -> Result<(), PeerError> {
        if link.is_some() {
            return Err(PeerError::AlreadyConnected);
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.key.as_str()))
            .await
            .map_err(|_| PeerError::Timeout)?
            .map_err(PeerError::Connect)?;

        socket2::SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(PeerError::Connect)?;
        stream.set_nodelay(true).map_err(PeerError::Connect)?;

        let mut opened = Link {
            stream,
            buf: BytesMut::with_capacity(512),
        };

        debug!(
            "Peer '{}': saying hello from local {}",
            self.key, self.local_address
        );
        self.encoder.encode_hello(&self.local_address, &mut opened.buf)?;
        self.write_buffered(&mut opened).await?;

        *link = Some(opened);
        *self.state.write() = PeerState::Connected;
        Ok(())
    }

    async fn send_locked(
        &self,
        link: &mut Option<Link>,
        message: &ClusterMessage,
    ) -> Result<(), PeerError> {
        let link = link.as_mut().ok_or(PeerError::NotConnected)?;

        link.buf.clear();
        self.encoder.encode(message, &mut link.buf)?;
        trace!(kind = message.type_name(), "Peer '{}': sending {}", self.key, message);
        self.write_buffered(link).await
    }

    async fn write_buffered(&self, link: &mut Link) -> Result<(), PeerError> {
        let Link { stream, buf } = link;
        tokio::time::timeout(self.write_timeout, write_frame(stream, buf))
            .await
            .map_err(|_| PeerError::Timeout)?
            .map_err(PeerError::Io)
    }

    async fn disconnect_locked(&self, link: &mut Option<Link>) {
        if let Some(mut closed) = link.take() {
            if let Err(e) = closed.stream.shutdown().await {
                debug!("Peer '{}': error disconnecting: {}", self.key, e);
            }
        }
        *self.state.write() = PeerState::Disconnected;
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Builds peer connections that share our address and timeouts
#[derive(Debug, Clone)]
pub struct PeerConnector {
    local_address: String,
    default_port: u16,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl PeerConnector {
    pub fn new(
        local_address: impl Into<String>,
        default_port: u16,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            default_port,
            connect_timeout,
            write_timeout,
        }
    }

    /// Our advertised address
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Peer key for an address as reported by discovery or a membership message
    pub fn key_for(&self, address: &str) -> String {
        normalize_address(address, self.default_port)
    }

    /// Create a (disconnected) connection to `address`
    pub fn build(&self, address: &str) -> PeerConnection {
        PeerConnection::new(
            self.key_for(address),
            self.local_address.clone(),
            self.connect_timeout,
            self.write_timeout,
        )
    }
}
