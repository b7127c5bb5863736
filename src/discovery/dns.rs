//! DNS service discovery
//!
//! Resolves a headless service name; each address record is one pod.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{normalize_address, DiscoveryError, MemberDiscovery};
use crate::config::resolve_local_ip;

/// Discovery that resolves a service name on every reload
pub struct DnsDiscovery {
    service: String,
    port: u16,
    local_key: String,
    local_ip: Option<IpAddr>,
    identity: String,
    resolved: RwLock<Vec<String>>,
}

impl DnsDiscovery {
    pub fn new(
        service: impl Into<String>,
        local_address: &str,
        port: u16,
        identity: impl Into<String>,
    ) -> Self {
        let local_key = normalize_address(local_address, port);
        let local_ip = local_key
            .parse::<SocketAddr>()
            .ok()
            .map(|addr| addr.ip())
            .filter(|ip| !ip.is_unspecified())
            .or_else(resolve_local_ip);

        Self {
            service: service.into(),
            port,
            local_key,
            local_ip,
            identity: identity.into(),
            resolved: RwLock::new(Vec::new()),
        }
    }

    fn is_local(&self, addr: &SocketAddr) -> bool {
        Some(addr.ip()) == self.local_ip || addr.to_string() == self.local_key
    }
}

#[async_trait]
impl MemberDiscovery for DnsDiscovery {
    async fn reload(&self) -> Result<(), DiscoveryError> {
        let addrs = tokio::net::lookup_host((self.service.as_str(), self.port))
            .await
            .map_err(|source| DiscoveryError::Lookup {
                service: self.service.clone(),
                source,
            })?;

        let others: BTreeSet<String> = addrs
            .filter(|addr| !self.is_local(addr))
            .map(|addr| addr.to_string())
            .collect();

        debug!("Resolved service {} to peers {:?}", self.service, others);
        *self.resolved.write() = others.into_iter().collect();
        Ok(())
    }

    fn other_addresses(&self) -> Vec<String> {
        self.resolved.read().clone()
    }

    fn local_identity(&self) -> String {
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_localhost_excluding_self() {
        let discovery = DnsDiscovery::new("localhost", "10.255.0.1:9911", 9911, "pod-a");
        discovery.reload().await.unwrap();

        let others = discovery.other_addresses();
        assert!(others.iter().all(|a| a.ends_with(":9911")));
        assert!(!others.contains(&"10.255.0.1:9911".to_string()));
    }

    #[tokio::test]
    async fn test_local_ip_is_excluded() {
        let discovery = DnsDiscovery::new("127.0.0.1", "127.0.0.1:9911", 9911, "pod-a");
        discovery.reload().await.unwrap();
        assert!(discovery.other_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let discovery = DnsDiscovery::new("no-such-host.invalid", "10.0.0.1:9911", 9911, "pod-a");
        assert!(matches!(
            discovery.reload().await,
            Err(DiscoveryError::Lookup { .. })
        ));
        assert!(discovery.other_addresses().is_empty());
    }
}
