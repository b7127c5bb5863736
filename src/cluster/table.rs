//! Peer Table
//!
//! Concurrent map from peer key to its outbound connection. Entries are
//! cloned out as `Arc`s before any await so no shard lock is held across I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::peer::{PeerConnection, PeerConnector};
use crate::protocol::ClusterMessage;

pub struct PeerTable {
    peers: DashMap<String, Arc<PeerConnection>>,
    connector: PeerConnector,
    /// Closed tables accept no new peers
    closed: AtomicBool,
}

impl PeerTable {
    pub fn new(connector: PeerConnector) -> Self {
        Self {
            peers: DashMap::new(),
            connector,
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse new peers until [`PeerTable::open`] is called
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> &PeerConnector {
        &self.connector
    }

    /// Peer key for an address (see [`PeerConnector::key_for`])
    pub fn key_for(&self, address: &str) -> String {
        self.connector.key_for(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peers.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<PeerConnection>> {
        self.peers.get(key).map(|entry| entry.value().clone())
    }

    /// Keys of all tracked peers
    pub fn keys(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time copy of the tracked peers
    pub fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Track a peer unless its key is already present or the table is closed
    pub fn insert(&self, peer: Arc<PeerConnection>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.peers.entry(peer.key().to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(peer.clone());
            }
        }
        // A close racing the insert must not leave the peer behind for `clear`
        if self.is_closed() {
            self.peers.remove_if(peer.key(), |_, current| Arc::ptr_eq(current, &peer));
            return false;
        }
        true
    }

    /// Connect to `address`, send `message`, and track the peer on success.
    ///
    /// If another task registered the same key meanwhile, the new
    /// connection is closed and the existing entry kept. A closed table
    /// registers nothing.
    pub async fn register(&self, address: &str, message: &ClusterMessage) -> bool {
        if self.is_closed() {
            debug!("Peer table closed, not registering {}", address);
            return false;
        }
        let peer = Arc::new(self.connector.build(address));

        if !peer.register(message).await {
            warn!("Unable to register with member {}", peer);
            return false;
        }

        if self.insert(peer.clone()) {
            info!("Registered with member {}", peer);
            return true;
        }

        if self.is_closed() {
            debug!("Peer table closed while registering {}", peer);
            // Undo the join this peer has already seen
            if let ClusterMessage::Membership {
                address, identity, ..
            } = message
            {
                let leave = ClusterMessage::membership(address.clone(), false, identity.clone());
                if let Err(e) = peer.send(&leave).await {
                    debug!("Unable to send leave to {}: {}", peer, e);
                }
            }
            peer.disconnect().await;
            return false;
        }
        peer.disconnect().await;
        debug!("Member {} registered concurrently, dropping duplicate", peer);
        true
    }

    /// Stop tracking `key` and disconnect it
    pub async fn remove(&self, key: &str) -> bool {
        match self.peers.remove(key) {
            Some((_, peer)) => {
                info!("Removed member {}", peer);
                peer.disconnect().await;
                true
            }
            None => {
                debug!("Member {} was not registered", key);
                false
            }
        }
    }

    /// Remove `peer` only if the table still maps its key to this same connection
    pub async fn evict(&self, peer: &Arc<PeerConnection>) -> bool {
        let removed = self
            .peers
            .remove_if(peer.key(), |_, current| Arc::ptr_eq(current, peer))
            .is_some();
        peer.disconnect().await;
        if removed {
            info!("De-registered member {}", peer);
        }
        removed
    }

    /// Disconnect and drop every tracked peer
    pub async fn clear(&self) {
        for key in self.keys() {
            if let Some((_, peer)) = self.peers.remove(&key) {
                peer.disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn table() -> Arc<PeerTable> {
        Arc::new(PeerTable::new(PeerConnector::new(
            "127.0.0.1:9911",
            9911,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )))
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let table = table();
        let first = Arc::new(table.connector().build("10.0.0.1"));
        let second = Arc::new(table.connector().build("10.0.0.1:9911"));

        assert!(table.insert(first.clone()));
        assert!(!table.insert(second));
        assert!(Arc::ptr_eq(&table.get("10.0.0.1:9911").unwrap(), &first));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_key() {
        let table = table();
        assert!(!table.remove("10.0.0.9:9911").await);
    }

    #[tokio::test]
    async fn test_evict_only_same_connection() {
        let table = table();
        let stale = Arc::new(table.connector().build("10.0.0.1"));
        let current = Arc::new(table.connector().build("10.0.0.1"));
        table.insert(current.clone());

        assert!(!table.evict(&stale).await);
        assert!(table.contains("10.0.0.1:9911"));

        assert!(table.evict(&current).await);
        assert!(table.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_same_key_single_winner() {
        let table = table();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table.insert(Arc::new(table.connector().build("10.0.0.2")))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_and_remove() {
        let table = table();
        for i in 0..20 {
            table.insert(Arc::new(table.connector().build(&format!("10.0.1.{}", i))));
        }

        let mut handles = Vec::new();
        for i in 0..20 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                // Drop the even originals and add a fresh range
                if i % 2 == 0 {
                    table.remove(&format!("10.0.1.{}:9911", i)).await;
                }
                table.insert(Arc::new(table.connector().build(&format!("10.0.2.{}", i))));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: BTreeSet<String> = (0..20)
            .filter(|i| i % 2 == 1)
            .map(|i| format!("10.0.1.{}:9911", i))
            .chain((0..20).map(|i| format!("10.0.2.{}:9911", i)))
            .collect();
        let actual: BTreeSet<String> = table.keys().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_closed_table_refuses_peers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let table = table();
        table.close();

        assert!(!table.insert(Arc::new(table.connector().build("10.0.0.1"))));
        let join = ClusterMessage::membership("127.0.0.1:9911", true, "pod-a");
        assert!(!table.register(&addr, &join).await);
        assert!(table.is_empty());

        table.open();
        assert!(table.register(&addr, &join).await);
        assert_eq!(table.keys(), vec![addr]);
    }

    #[tokio::test]
    async fn test_clear_empties_table() {
        let table = table();
        table.insert(Arc::new(table.connector().build("10.0.0.1")));
        table.insert(Arc::new(table.connector().build("10.0.0.2")));

        table.clear().await;
        assert!(table.is_empty());
    }
}
