//! Discovery Configuration

use serde::Deserialize;

/// How peer addresses are found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Fixed member list
    #[default]
    Static,
    /// Resolve a (headless) service name on every reload
    Dns,
}

/// Member discovery configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Discovery mode
    pub mode: DiscoveryMode,
    /// Static member addresses ("host" or "host:port")
    pub members: Vec<String>,
    /// Service name resolved in dns mode
    pub service: Option<String>,
}
