//! Cluster Configuration
//!
//! Listener, worker pool and membership timing for the peer broadcast.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

/// Default cluster port
pub const DEFAULT_PORT: u16 = 9911;

/// Cluster configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Address the listener binds to
    /// Default: 0.0.0.0:9911
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Port appended to discovered addresses that carry no port
    /// If not set, the bind port is used
    pub port: Option<u16>,

    /// Address peers use to reach us ("host:port")
    /// If not set, resolved from hostname plus the bound port
    pub advertise_addr: Option<String>,

    /// Local identity announced in membership messages
    /// If not set, the hostname is used
    pub pod_name: Option<String>,

    /// Name given to inbound connection workers (shows up in log spans)
    #[serde(default = "default_worker_pool_name")]
    pub worker_pool_name: String,

    /// Maximum number of inbound connections served concurrently.
    /// Each peer holds one, so this caps the cluster size. Connections
    /// beyond it are closed.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Accepted connections allowed to wait for a free worker
    #[serde(default = "default_work_queue_capacity")]
    pub work_queue_capacity: usize,

    /// Timeout for outbound TCP connects (e.g., "10s")
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single outbound frame write
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Idle time after which an inbound connection is closed ("0s" disables)
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Accept loop wake-up interval
    #[serde(default = "default_accept_timeout", with = "humantime_serde")]
    pub accept_timeout: Duration,

    /// Membership check interval in steady state
    #[serde(default = "default_normal_check_interval", with = "humantime_serde")]
    pub normal_check_interval: Duration,

    /// Membership check interval after send errors
    #[serde(default = "default_error_check_interval", with = "humantime_serde")]
    pub error_check_interval: Duration,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_worker_pool_name() -> String {
    "cachecast-cluster".to_string()
}

fn default_worker_pool_size() -> usize {
    1024
}

fn default_work_queue_capacity() -> usize {
    128
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_accept_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_normal_check_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_error_check_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
            advertise_addr: None,
            pod_name: None,
            worker_pool_name: default_worker_pool_name(),
            worker_pool_size: default_worker_pool_size(),
            work_queue_capacity: default_work_queue_capacity(),
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
            read_timeout: default_read_timeout(),
            accept_timeout: default_accept_timeout(),
            normal_check_interval: default_normal_check_interval(),
            error_check_interval: default_error_check_interval(),
        }
    }
}

impl ClusterConfig {
    /// Configuration for a node listening on `bind` and advertising it as-is
    pub fn local(bind: SocketAddr) -> Self {
        Self {
            bind,
            advertise_addr: Some(bind.to_string()),
            ..Self::default()
        }
    }

    /// Port peers listen on when an address carries none
    pub fn peer_port(&self) -> u16 {
        self.port.unwrap_or(self.bind.port())
    }

    /// Get the pod name, falling back to the hostname
    pub fn get_pod_name(&self) -> String {
        self.pod_name.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| format!("node-{}", rand_id()))
        })
    }

    /// Get the advertise address (what peers use to reach us)
    /// Priority: explicit config > resolved hostname > bound address
    pub fn get_advertise_addr(&self, bound: SocketAddr) -> String {
        if let Some(addr) = &self.advertise_addr {
            return addr.clone();
        }

        if bound.ip().is_unspecified() {
            if let Some(ip) = resolve_local_ip() {
                return SocketAddr::new(ip, bound.port()).to_string();
            }
        }

        bound.to_string()
    }

    /// Address announced to peers for this node's configured bind address
    pub fn local_address(&self) -> String {
        self.get_advertise_addr(self.bind)
    }
}

/// Resolve the local machine's IP address by resolving the hostname
pub(crate) fn resolve_local_ip() -> Option<IpAddr> {
    let hostname = hostname::get().ok()?;
    let hostname_str = hostname.to_string_lossy();

    let addr_str = format!("{}:0", hostname_str);
    addr_str
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4()) // Prefer IPv4
        .map(|addr| addr.ip())
}

/// Generate a random ID for node identification
fn rand_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos & 0xFFFFFFFF)
}
