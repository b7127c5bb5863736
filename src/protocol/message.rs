//! Cluster message type

use std::fmt;

use bytes::Bytes;

/// A message broadcast around the cluster.
///
/// Exactly one variant is populated; the wire key decides which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMessage {
    /// A peer coming online (`joining = true`) or leaving.
    Membership {
        /// Address other peers use to reach the announcing peer
        address: String,
        /// Join or leave
        joining: bool,
        /// Identity of the announcing peer (pod name)
        identity: String,
    },
    /// A serialized application event.
    Data(Bytes),
}

impl ClusterMessage {
    /// Create a join/leave membership message
    pub fn membership(address: impl Into<String>, joining: bool, identity: impl Into<String>) -> Self {
        ClusterMessage::Membership {
            address: address.into(),
            joining,
            identity: identity.into(),
        }
    }

    /// Create a data message
    pub fn data(payload: impl Into<Bytes>) -> Self {
        ClusterMessage::Data(payload.into())
    }

    /// True for membership messages
    pub fn is_membership(&self) -> bool {
        matches!(self, ClusterMessage::Membership { .. })
    }

    /// True for a graceful leave. The receiving connection ends after it.
    pub fn is_leave(&self) -> bool {
        matches!(self, ClusterMessage::Membership { joining: false, .. })
    }

    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ClusterMessage::Membership { joining: true, .. } => "Join",
            ClusterMessage::Membership { joining: false, .. } => "Leave",
            ClusterMessage::Data(_) => "Data",
        }
    }
}

impl fmt::Display for ClusterMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterMessage::Membership {
                address,
                joining,
                identity,
            } => write!(f, "register {} {} ({})", joining, address, identity),
            ClusterMessage::Data(payload) => write!(f, "[data {} bytes]", payload.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leave_detection() {
        assert!(ClusterMessage::membership("10.0.0.1:9911", false, "pod-a").is_leave());
        assert!(!ClusterMessage::membership("10.0.0.1:9911", true, "pod-a").is_leave());
        assert!(!ClusterMessage::data(vec![1, 2, 3]).is_leave());
    }

    #[test]
    fn test_type_name_and_display() {
        let join = ClusterMessage::membership("10.0.0.1:9911", true, "pod-a");
        assert_eq!(join.type_name(), "Join");
        assert_eq!(join.to_string(), "register true 10.0.0.1:9911 (pod-a)");

        let data = ClusterMessage::data(vec![0u8; 5]);
        assert_eq!(data.type_name(), "Data");
        assert_eq!(data.to_string(), "[data 5 bytes]");
    }
}
