//! Device and application metadata snapshot
//!
//! Collecting real device metadata is the host application's job; this crate
//! only stamps whatever snapshot it is handed onto every event. `collect`
//! fills in the fields the pipeline itself owns (device ids, SDK identity)
//! and leaves the rest to the host.

use serde::{Deserialize, Serialize};

use crate::prefs::{self, Preferences};

/// SDK name reported in every event
pub const SDK_NAME: &str = "clickstream-rust-sdk";

/// SDK version reported in every event
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Immutable snapshot of device and application metadata
///
/// Cloned into every event at creation time; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Vendor device id, persisted across restarts
    pub device_id: String,
    /// Advertising/device unique id; empty when unavailable
    pub device_unique_id: String,
    pub platform: String,
    pub os_version: String,
    pub make: String,
    pub brand: String,
    pub model: String,
    pub carrier: String,
    pub locale: String,
    pub system_language: String,
    pub country_code: String,
    pub screen_height: i64,
    pub screen_width: i64,
    /// Offset from UTC in milliseconds
    pub zone_offset: i64,
    pub app_version: String,
    pub app_package_name: String,
    pub app_title: String,
}

impl SystemInfo {
    /// Build a snapshot with the pipeline-owned fields resolved from
    /// preferences and everything else defaulted
    ///
    /// Hosts should override the device/app fields with real values before
    /// handing the snapshot to the pipeline.
    pub fn collect(prefs: &dyn Preferences) -> Self {
        let offset_seconds = chrono::Local::now().offset().local_minus_utc() as i64;
        Self {
            device_id: prefs::device_id(prefs),
            device_unique_id: String::new(),
            platform: "iOS".to_string(),
            os_version: String::new(),
            make: "apple".to_string(),
            brand: "apple".to_string(),
            model: String::new(),
            carrier: "UNKNOWN".to_string(),
            locale: "UNKNOWN".to_string(),
            system_language: "UNKNOWN".to_string(),
            country_code: "UNKNOWN".to_string(),
            screen_height: 0,
            screen_width: 0,
            zone_offset: offset_seconds * 1000,
            app_version: String::new(),
            app_package_name: String::new(),
            app_title: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;

    #[test]
    fn test_collect_persists_device_id() {
        let prefs = MemoryPreferences::new();
        let first = SystemInfo::collect(&prefs);
        let second = SystemInfo::collect(&prefs);
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.make, "apple");
    }
}
