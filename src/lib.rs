//! CacheCast - cluster cache invalidation broadcast
//!
//! Keeps a TCP connection to every peer process found by member discovery
//! and fans out opaque application events (typically cache invalidations)
//! to all of them, applying the events peers send back through a host
//! supplied [`EventCodec`].

pub mod cluster;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod event;
pub mod protocol;

pub use cluster::{ClusterBroadcast, ClusterError, ClusterStatus};
pub use config::Config;
pub use discovery::{DnsDiscovery, MemberDiscovery, StaticDiscovery};
pub use event::{EventCodec, RawEventCodec};
pub use protocol::ClusterMessage;
