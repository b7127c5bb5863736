//! Member Discovery
//!
//! The query interface the cluster uses to learn which peers should exist,
//! with a static list implementation and a DNS (headless service) one.
//!
//! Addresses are `host` or `host:port`; [`normalize_address`] turns them
//! into the `host:port` peer keys the peer table uses.

mod dns;
mod static_list;

pub use dns::DnsDiscovery;
pub use static_list::StaticDiscovery;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::config::{ClusterConfig, DiscoveryConfig, DiscoveryMode};

/// Error type for discovery lookups
#[derive(Debug)]
pub enum DiscoveryError {
    /// Name resolution failed
    Lookup { service: String, source: std::io::Error },
    /// Other error
    Other(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Lookup { service, source } => {
                write!(f, "lookup of '{}' failed: {}", service, source)
            }
            DiscoveryError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::Lookup { source, .. } => Some(source),
            DiscoveryError::Other(_) => None,
        }
    }
}

/// Source of the expected cluster membership
#[async_trait]
pub trait MemberDiscovery: Send + Sync {
    /// Refresh the member view
    async fn reload(&self) -> Result<(), DiscoveryError>;

    /// Addresses of every expected peer except ourselves, as of the last reload
    fn other_addresses(&self) -> Vec<String>;

    /// Identity of the local process (pod name)
    fn local_identity(&self) -> String;
}

/// Build the discovery named by the configuration
pub fn from_config(
    discovery: &DiscoveryConfig,
    cluster: &ClusterConfig,
    local_address: &str,
) -> Box<dyn MemberDiscovery> {
    let identity = cluster.get_pod_name();
    match discovery.mode {
        DiscoveryMode::Static => Box::new(StaticDiscovery::new(
            discovery.members.clone(),
            local_address,
            cluster.peer_port(),
            identity,
        )),
        DiscoveryMode::Dns => Box::new(DnsDiscovery::new(
            discovery.service.clone().unwrap_or_default(),
            local_address,
            cluster.peer_port(),
            identity,
        )),
    }
}

/// Normalize an address into a `host:port` peer key
///
/// Bare hosts get `default_port`; bare IPv6 addresses are bracketed.
pub fn normalize_address(address: &str, default_port: u16) -> String {
    let address = address.trim();

    if let Ok(addr) = address.parse::<SocketAddr>() {
        return addr.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    if let Some((host, port)) = address.rsplit_once(':') {
        if !host.contains(':') && port.parse::<u16>().is_ok() {
            return address.to_string();
        }
    }
    format!("{}:{}", address, default_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_ipv4() {
        assert_eq!(normalize_address("10.0.0.1", 9911), "10.0.0.1:9911");
    }

    #[test]
    fn test_normalize_keeps_port() {
        assert_eq!(normalize_address("10.0.0.1:9000", 9911), "10.0.0.1:9000");
        assert_eq!(normalize_address("api-0.svc:9000", 9911), "api-0.svc:9000");
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(normalize_address(" api-0.svc ", 9911), "api-0.svc:9911");
    }

    #[test]
    fn test_normalize_ipv6() {
        assert_eq!(normalize_address("::1", 9911), "[::1]:9911");
        assert_eq!(normalize_address("[::1]:9000", 9911), "[::1]:9000");
    }
}
