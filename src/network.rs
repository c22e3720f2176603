//! Network reachability seam
//!
//! Reachability detection lives in the host application; the pipeline only
//! consumes a signal. The submission engine skips work while offline, and the
//! current network type is stamped onto events at creation time.

use std::sync::RwLock;

/// Network type strings stamped onto events
pub mod network_type {
    pub const WIFI: &str = "WIFI";
    pub const MOBILE: &str = "Mobile";
    pub const UNKNOWN: &str = "UNKNOWN";
}

/// Reachability signal consumed by the pipeline
pub trait NetworkMonitor: Send + Sync {
    /// Whether the device currently has connectivity
    fn is_online(&self) -> bool;
    /// Current network type (see [`network_type`])
    fn network_type(&self) -> String;
}

/// Host-updatable monitor holding the latest reachability state
pub struct SharedNetworkMonitor {
    state: RwLock<(bool, String)>,
}

impl SharedNetworkMonitor {
    pub fn new(is_online: bool, network_type: impl Into<String>) -> Self {
        Self {
            state: RwLock::new((is_online, network_type.into())),
        }
    }

    /// Update the reachability state from the host's network callback
    pub fn update(&self, is_online: bool, network_type: impl Into<String>) {
        *self.state.write().unwrap() = (is_online, network_type.into());
    }
}

impl Default for SharedNetworkMonitor {
    fn default() -> Self {
        Self::new(true, network_type::UNKNOWN)
    }
}

impl NetworkMonitor for SharedNetworkMonitor {
    fn is_online(&self) -> bool {
        self.state.read().unwrap().0
    }

    fn network_type(&self) -> String {
        self.state.read().unwrap().1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_monitor_updates() {
        let monitor = SharedNetworkMonitor::default();
        assert!(monitor.is_online());
        assert_eq!(monitor.network_type(), network_type::UNKNOWN);

        monitor.update(false, network_type::WIFI);
        assert!(!monitor.is_online());
        assert_eq!(monitor.network_type(), network_type::WIFI);
    }
}
