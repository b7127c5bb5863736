//! Static member list

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{normalize_address, DiscoveryError, MemberDiscovery};

/// Discovery backed by a fixed (or externally replaced) member list
pub struct StaticDiscovery {
    members: RwLock<Vec<String>>,
    local_key: String,
    port: u16,
    identity: String,
}

impl StaticDiscovery {
    pub fn new(
        members: Vec<String>,
        local_address: &str,
        port: u16,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            members: RwLock::new(members),
            local_key: normalize_address(local_address, port),
            port,
            identity: identity.into(),
        }
    }

    /// Replace the member list; takes effect on the next membership check
    pub fn set_members(&self, members: Vec<String>) {
        *self.members.write() = members;
    }
}

#[async_trait]
impl MemberDiscovery for StaticDiscovery {
    async fn reload(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    fn other_addresses(&self) -> Vec<String> {
        let unique: BTreeSet<String> = self
            .members
            .read()
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| normalize_address(m, self.port))
            .filter(|key| *key != self.local_key)
            .collect();
        unique.into_iter().collect()
    }

    fn local_identity(&self) -> String {
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excludes_local_and_duplicates() {
        let discovery = StaticDiscovery::new(
            vec![
                "10.0.0.1".to_string(),
                "10.0.0.2:9911".to_string(),
                "10.0.0.2".to_string(),
                "".to_string(),
            ],
            "10.0.0.1:9911",
            9911,
            "pod-a",
        );

        assert_eq!(discovery.other_addresses(), vec!["10.0.0.2:9911"]);
        assert_eq!(discovery.local_identity(), "pod-a");
    }

    #[tokio::test]
    async fn test_set_members() {
        let discovery = StaticDiscovery::new(vec![], "10.0.0.1:9911", 9911, "pod-a");
        assert!(discovery.other_addresses().is_empty());

        discovery.set_members(vec!["10.0.0.3".to_string()]);
        discovery.reload().await.unwrap();
        assert_eq!(discovery.other_addresses(), vec!["10.0.0.3:9911"]);
    }
}
