//! Cluster Broadcast
//!
//! Process-local engine tying the listener, peer table and reconciler
//! together. Outbound events go to every tracked peer; inbound messages
//! update membership or are handed to the host codec.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use super::listener::{ClusterListener, ListenerConfig, MessageProcessor};
use super::peer::{PeerConnection, PeerConnector};
use super::reconciler::{MembershipReconciler, ReconcileReport};
use super::table::PeerTable;
use super::ClusterError;
use crate::config::ClusterConfig;
use crate::discovery::{DiscoveryError, MemberDiscovery};
use crate::event::EventCodec;
use crate::protocol::ClusterMessage;

/// Snapshot of the engine's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Peers currently tracked
    pub member_count: usize,
    /// Data messages received
    pub incoming_count: u64,
    /// Broadcast calls made
    pub outgoing_count: u64,
}

/// Broadcasts host events to cluster peers and applies theirs locally
pub struct ClusterBroadcast<C: EventCodec> {
    core: Arc<BroadcastCore<C>>,
    config: ClusterConfig,
    listener: tokio::sync::Mutex<Option<ClusterListener>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with the listener's workers
struct BroadcastCore<C: EventCodec> {
    local_address: String,
    local_key: String,
    identity: String,
    table: Arc<PeerTable>,
    reconciler: MembershipReconciler,
    codec: C,
    join: ClusterMessage,
    incoming: AtomicU64,
    outgoing: AtomicU64,
    shutting_down: AtomicBool,
}

impl<C: EventCodec> ClusterBroadcast<C> {
    pub fn new(config: ClusterConfig, discovery: Arc<dyn MemberDiscovery>, codec: C) -> Self {
        let local_address = config.local_address();
        let identity = discovery.local_identity();

        let connector = PeerConnector::new(
            local_address.clone(),
            config.peer_port(),
            config.connect_timeout,
            config.write_timeout,
        );
        let local_key = connector.key_for(&local_address);
        let table = Arc::new(PeerTable::new(connector));
        let join = ClusterMessage::membership(local_address.clone(), true, identity.clone());
        let reconciler = MembershipReconciler::new(
            discovery,
            table.clone(),
            join.clone(),
            config.normal_check_interval,
            config.error_check_interval,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            core: Arc::new(BroadcastCore {
                local_address,
                local_key,
                identity,
                table,
                reconciler,
                codec,
                join,
                incoming: AtomicU64::new(0),
                outgoing: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
            config,
            listener: tokio::sync::Mutex::new(None),
            ticker: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Address peers use to reach us
    pub fn local_address(&self) -> &str {
        &self.core.local_address
    }

    pub fn identity(&self) -> &str {
        &self.core.identity
    }

    /// Start listening, run the initial membership check and the periodic one.
    ///
    /// Bind failures are fatal; a failed initial check is retried by the ticker.
    pub async fn startup(&self) -> Result<(), ClusterError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Err(ClusterError::AlreadyStarted);
        }

        let processor: Arc<dyn MessageProcessor> = self.core.clone();
        let started = ClusterListener::start(
            self.config.bind,
            ListenerConfig::from(&self.config),
            processor,
        )
        .await
        .map_err(|source| ClusterError::Bind {
            addr: self.config.bind,
            source,
        })?;

        info!(
            "Cluster member {} ({}) started on {}",
            self.core.local_address,
            self.core.identity,
            started.local_addr()
        );
        *listener = Some(started);

        self.core.shutting_down.store(false, Ordering::SeqCst);
        self.core.table.open();
        self.core.reconciler.resume();
        if let Err(e) = self.core.reconciler.reconcile().await {
            warn!("Initial membership check failed: {}", e);
        }

        *self.ticker.lock() = Some(self.spawn_ticker());
        Ok(())
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let core = self.core.clone();
        let interval = self.config.error_check_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.recv() => {
                        match result {
                            Ok(()) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = ticker.tick() => {
                        core.reconciler.check_status(false).await;
                    }
                }
            }
            debug!("Membership ticker stopped");
        })
    }

    /// Announce our departure, disconnect from every peer and stop listening.
    ///
    /// Calling this more than once, or before `startup`, does nothing.
    pub async fn shutdown(&self) {
        let mut listener = self.listener.lock().await;
        let Some(started) = listener.take() else {
            return;
        };

        // A pass already running finishes first so its peers receive the leave
        self.core.shutting_down.store(true, Ordering::SeqCst);
        self.core.reconciler.suspend().await;
        self.core.table.close();
        let _ = self.shutdown_tx.send(());

        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.abort();
            let _ = ticker.await;
        }

        self.core.deregister().await;
        self.core.table.clear().await;
        started.shutdown().await;
        info!("Cluster member {} shut down", self.core.local_address);
    }

    /// Send an event to every tracked peer
    pub async fn broadcast(&self, event: &C::Event) {
        self.core.broadcast(event).await
    }

    /// Handle one inbound message; true means the connection should close
    pub async fn process(&self, message: ClusterMessage) -> bool {
        self.core.process(message).await
    }

    /// Run a membership pass now
    pub async fn reconcile(&self) -> Result<ReconcileReport, DiscoveryError> {
        self.core.reconciler.reconcile().await
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            member_count: self.core.table.len(),
            incoming_count: self.core.incoming.load(Ordering::Relaxed),
            outgoing_count: self.core.outgoing.load(Ordering::Relaxed),
        }
    }

    /// Sorted keys of the tracked peers
    pub fn members(&self) -> Vec<String> {
        let mut keys = self.core.table.keys();
        keys.sort();
        keys
    }
}

impl<C: EventCodec> BroadcastCore<C> {
    async fn broadcast(&self, event: &C::Event) {
        self.outgoing.fetch_add(1, Ordering::Relaxed);

        let payload = match self.codec.serialize(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error serializing event for cluster members: {}", e);
                return;
            }
        };

        let message = ClusterMessage::Data(payload);
        let mut errors = 0;
        for peer in self.table.snapshot() {
            if !self.send(&peer, &message).await {
                errors += 1;
            }
        }

        if errors > 0 {
            debug!("Broadcast had {} send errors", errors);
            self.reconciler.check_status(true).await;
        }
    }

    /// Send to one peer, reconnecting once on failure.
    ///
    /// The message is not resent after a reconnect.
    async fn send(&self, peer: &Arc<PeerConnection>, message: &ClusterMessage) -> bool {
        let Err(e) = peer.send(message).await else {
            return true;
        };

        warn!("Reconnecting to {} after error sending message: {}", peer, e);
        if let Err(e) = peer.reconnect().await {
            warn!("Error reconnecting to {}, de-registering it: {}", peer, e);
            self.table.evict(peer).await;
        }
        false
    }

    async fn deregister(&self) {
        info!("Leaving cluster as {}", self.local_address);
        let leave = ClusterMessage::membership(self.local_address.clone(), false, self.identity.clone());
        for peer in self.table.snapshot() {
            if let Err(e) = peer.send(&leave).await {
                debug!("Unable to send leave to {}: {}", peer, e);
            }
        }
    }

    async fn process(&self, message: ClusterMessage) -> bool {
        trace!("Processing {}", message);
        match message {
            ClusterMessage::Membership {
                address,
                joining,
                identity,
            } => {
                self.member_changed(&address, joining, &identity).await;
                !joining
            }
            ClusterMessage::Data(payload) => {
                self.incoming.fetch_add(1, Ordering::Relaxed);
                match self.codec.deserialize(payload) {
                    Ok(event) => self.codec.dispatch(event),
                    Err(e) => warn!("Dropping undecodable event: {}", e),
                }
                false
            }
        }
    }

    async fn member_changed(&self, address: &str, joining: bool, identity: &str) {
        let key = self.table.key_for(address);
        if key == self.local_key {
            debug!("Ignoring membership message for local address {}", address);
            return;
        }

        if !joining {
            info!("Cluster member leaving {} ({})", key, identity);
            self.table.remove(&key).await;
        } else if self.table.contains(&key) {
            warn!("Cluster member {} ({}) already registered", key, identity);
        } else if self.shutting_down.load(Ordering::SeqCst) {
            debug!("Ignoring join from {} during shutdown", key);
        } else {
            info!("Cluster member joining {} ({})", key, identity);
            self.table.register(address, &self.join).await;
        }
    }
}

#[async_trait]
impl<C: EventCodec> MessageProcessor for BroadcastCore<C> {
    async fn process(&self, message: ClusterMessage) -> bool {
        BroadcastCore::process(self, message).await
    }

    async fn connection_closed(&self) {
        self.reconciler.check_status(false).await;
    }
}
