//! Cluster Module
//!
//! Peer-to-peer broadcast of cache invalidation events between processes.
//!
//! # Architecture
//!
//! Every process keeps one outbound TCP connection per peer and accepts
//! inbound connections from all of them. Outbound sockets carry our events
//! and membership announcements; inbound sockets are read by the listener's
//! worker pool.
//!
//! - [`PeerConnection`]: outbound socket to one peer
//! - [`PeerTable`]: peer key to connection map
//! - [`MembershipReconciler`]: converges the table toward discovery
//! - [`ClusterListener`]: accept loop and worker pool
//! - [`ClusterBroadcast`]: the engine hosts talk to
//!
//! # Usage
//!
//! ```toml
//! # cachecast.toml
//! [cluster]
//! bind = "0.0.0.0:9911"
//! pod_name = "api-0"
//!
//! [discovery]
//! mode = "dns"
//! service = "api-headless.default.svc.cluster.local"
//! ```

mod broadcast;
mod listener;
mod peer;
mod reconciler;
mod table;

use std::fmt;
use std::io;
use std::net::SocketAddr;

pub use broadcast::{ClusterBroadcast, ClusterStatus};
pub use listener::{ClusterListener, ListenerConfig, MessageProcessor};
pub use peer::{PeerConnection, PeerConnector, PeerError, PeerState};
pub use reconciler::{MembershipReconciler, ReconcileReport};
pub use table::PeerTable;

// Re-export cluster config
pub use crate::config::ClusterConfig;

/// Error type for the cluster engine lifecycle
#[derive(Debug)]
pub enum ClusterError {
    /// Listener could not bind
    Bind { addr: SocketAddr, source: io::Error },
    /// `startup` called on a running engine
    AlreadyStarted,
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Bind { addr, source } => {
                write!(f, "failed to bind cluster listener on {}: {}", addr, source)
            }
            ClusterError::AlreadyStarted => write!(f, "cluster already started"),
        }
    }
}

impl std::error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusterError::Bind { source, .. } => Some(source),
            ClusterError::AlreadyStarted => None,
        }
    }
}
