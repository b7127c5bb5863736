//! Membership Reconciler
//!
//! Converges the peer table toward the expected set reported by discovery.
//! Passes are throttled: one runs when the last is older than the normal
//! interval, or older than the error interval while errors are pending.
//! At most one pass runs at a time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::table::PeerTable;
use crate::discovery::{DiscoveryError, MemberDiscovery};
use crate::protocol::ClusterMessage;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Expected peer keys
    pub expected: BTreeSet<String>,
    /// Keys removed because discovery no longer reports them
    pub removed: Vec<String>,
    /// Keys newly registered
    pub added: Vec<String>,
    /// Keys we failed to register with (retried on a later pass)
    pub failed: Vec<String>,
}

pub struct MembershipReconciler {
    discovery: Arc<dyn MemberDiscovery>,
    table: Arc<PeerTable>,
    /// Join message sent to newly registered peers
    join: ClusterMessage,
    normal_interval: Duration,
    error_interval: Duration,
    last_check: Mutex<Option<Instant>>,
    error_count: AtomicU64,
    pass: tokio::sync::Mutex<()>,
    suspended: AtomicBool,
}

impl MembershipReconciler {
    pub fn new(
        discovery: Arc<dyn MemberDiscovery>,
        table: Arc<PeerTable>,
        join: ClusterMessage,
        normal_interval: Duration,
        error_interval: Duration,
    ) -> Self {
        Self {
            discovery,
            table,
            join,
            normal_interval,
            error_interval,
            last_check: Mutex::new(None),
            error_count: AtomicU64::new(0),
            pass: tokio::sync::Mutex::new(()),
            suspended: AtomicBool::new(false),
        }
    }

    /// Errors seen since the last successful pass
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Stop new passes from starting and wait for a running one to finish
    pub async fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        let _pass = self.pass.lock().await;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    fn is_due(&self) -> bool {
        let Some(last) = *self.last_check.lock() else {
            return true;
        };
        let elapsed = last.elapsed();
        elapsed > self.normal_interval
            || (self.error_count() > 0 && elapsed > self.error_interval)
    }

    /// Record an error (if any) and run a pass if one is due.
    ///
    /// Returns true if a pass ran.
    pub async fn check_status(&self, had_error: bool) -> bool {
        if had_error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        if self.is_suspended() || !self.is_due() {
            return false;
        }

        let _pass = self.pass.lock().await;
        // Another caller may have completed a pass, or suspended us, while we waited
        if self.is_suspended() || !self.is_due() {
            return false;
        }
        let _ = self.run_pass().await;
        true
    }

    /// Run a pass now, regardless of throttling. Does nothing while suspended.
    pub async fn reconcile(&self) -> Result<ReconcileReport, DiscoveryError> {
        let _pass = self.pass.lock().await;
        if self.is_suspended() {
            debug!("Membership check skipped, reconciler suspended");
            return Ok(ReconcileReport::default());
        }
        self.run_pass().await
    }

    async fn run_pass(&self) -> Result<ReconcileReport, DiscoveryError> {
        if let Err(e) = self.discovery.reload().await {
            *self.last_check.lock() = Some(Instant::now());
            self.error_count.fetch_add(1, Ordering::Relaxed);
            error!("Error during membership check: {}", e);
            return Err(e);
        }

        let expected: BTreeSet<String> = self
            .discovery
            .other_addresses()
            .iter()
            .map(|address| self.table.key_for(address))
            .collect();
        *self.last_check.lock() = Some(Instant::now());

        debug!(
            "check membership - expected:{:?} current:{:?}",
            expected,
            self.table.keys()
        );

        let mut report = ReconcileReport::default();
        for key in self.table.keys() {
            if !expected.contains(&key) {
                self.table.remove(&key).await;
                report.removed.push(key);
            }
        }

        let missing: Vec<&String> = expected
            .iter()
            .filter(|key| !self.table.contains(key))
            .collect();
        let results = join_all(missing.into_iter().map(|key| async move {
            let registered = self.table.register(key, &self.join).await;
            (key.clone(), registered)
        }))
        .await;

        for (key, registered) in results {
            if registered {
                report.added.push(key);
            } else {
                report.failed.push(key);
            }
        }

        self.error_count.store(0, Ordering::Relaxed);
        report.expected = expected;

        if !report.removed.is_empty() || !report.added.is_empty() || !report.failed.is_empty() {
            info!(
                "Membership check: added {:?}, removed {:?}, failed {:?}",
                report.added, report.removed, report.failed
            );
        }
        Ok(report)
    }
}
