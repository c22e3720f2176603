//! Event model
//!
//! A [`ClickstreamEvent`] is one analytics occurrence: a validated type name,
//! typed attributes, and the device/session context captured at creation
//! time. Events serialize to a flat JSON object with sorted keys so the same
//! event always produces the same bytes (and the same `hashCode`).

pub mod batch;
pub mod check;

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::session::Session;
use crate::system::{SystemInfo, SDK_NAME, SDK_VERSION};

/// Hard limits on event shape
pub mod limit {
    /// Max event type length
    pub const MAX_EVENT_TYPE_LENGTH: usize = 50;
    /// Max number of attributes on a single event
    pub const MAX_NUM_OF_ATTRIBUTES: usize = 500;
    /// Max number of user attributes
    pub const MAX_NUM_OF_USER_ATTRIBUTES: usize = 100;
    /// Max attribute name length
    pub const MAX_LENGTH_OF_NAME: usize = 50;
    /// Max string attribute value length
    pub const MAX_LENGTH_OF_VALUE: usize = 1024;
    /// Max string user attribute value length
    pub const MAX_LENGTH_OF_USER_VALUE: usize = 256;
    /// Max length of a synthetic error entry's message
    pub const MAX_LENGTH_OF_ERROR_VALUE: usize = 256;
}

/// Preset event type names recorded by the pipeline itself
pub mod preset {
    pub const SESSION_START: &str = "_session_start";
    pub const FIRST_OPEN: &str = "_first_open";
    pub const APP_UPDATE: &str = "_app_update";
    pub const OS_UPDATE: &str = "_os_update";
    pub const USER_ENGAGEMENT: &str = "_user_engagement";
    pub const SCREEN_VIEW: &str = "_screen_view";
    pub const PROFILE_SET: &str = "_profile_set";
}

/// Reserved attribute names
pub mod reserved {
    pub const USER_ID: &str = "_user_id";
    pub const USER_FIRST_TOUCH_TIMESTAMP: &str = "_user_first_touch_timestamp";
    pub const PREVIOUS_APP_VERSION: &str = "_previous_app_version";
    pub const PREVIOUS_OS_VERSION: &str = "_previous_os_version";
    pub const ENGAGEMENT_TIMESTAMP: &str = "_engagement_time_msec";
    pub const ENTRANCES: &str = "_entrances";
    pub const SCREEN_NAME: &str = "_screen_name";
    pub const SCREEN_ID: &str = "_screen_id";
    pub const PREVIOUS_SCREEN_NAME: &str = "_previous_screen_name";
    pub const PREVIOUS_SCREEN_ID: &str = "_previous_screen_id";
    pub const SESSION_ID: &str = "_session_id";
    pub const SESSION_START_TIMESTAMP: &str = "_session_start_timestamp";
    pub const SESSION_DURATION: &str = "_session_duration";
    pub const SESSION_NUMBER: &str = "_session_number";
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Character count of the value as it counts against the value-length
    /// limit; only strings are length-limited
    pub fn string_len(&self) -> Option<usize> {
        match self {
            AttributeValue::String(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Long(n) => json!(n),
            AttributeValue::Double(n) => json!(n),
            AttributeValue::Bool(b) => json!(b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Long(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Long(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// One analytics occurrence, pre-persistence
#[derive(Debug, Clone)]
pub struct ClickstreamEvent {
    pub event_id: String,
    pub event_type: String,
    pub app_id: String,
    /// User unique id at creation time
    pub unique_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub session: Option<Session>,
    pub system_info: SystemInfo,
    pub network_type: String,
    attributes: BTreeMap<String, AttributeValue>,
    user_attributes: BTreeMap<String, Value>,
}

impl ClickstreamEvent {
    pub fn new(
        event_type: impl Into<String>,
        app_id: impl Into<String>,
        unique_id: impl Into<String>,
        session: Option<Session>,
        system_info: SystemInfo,
        network_type: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            app_id: app_id.into(),
            unique_id: unique_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            session,
            system_info,
            network_type: network_type.into(),
            attributes: BTreeMap::new(),
            user_attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute, validating name and value limits
    ///
    /// A failed validation never drops feedback: the offending entry is
    /// replaced by exactly one synthetic error entry carrying a truncated
    /// diagnostic.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        // Overwriting an existing key does not consume extra capacity
        let current_number = if self.attributes.contains_key(&key) {
            self.attributes.len() - 1
        } else {
            self.attributes.len()
        };
        match check::check_attribute(current_number, &key, &value) {
            Some(error) => {
                self.attributes.insert(
                    error.error_key.to_string(),
                    AttributeValue::String(error.message),
                );
            }
            None => {
                self.attributes.insert(key, value);
            }
        }
    }

    /// Add a pre-validated attribute (used when merging global attributes)
    pub fn add_global_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    /// Replace the user attribute map with the given snapshot
    pub fn set_user_attributes(&mut self, user_attributes: BTreeMap<String, Value>) {
        self.user_attributes = user_attributes;
    }

    /// Look up an attribute by key
    pub fn user_attributes(&self) -> &BTreeMap<String, Value> {
        &self.user_attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Serialize to the wire JSON object
    ///
    /// Keys come out sorted (serde_json maps are BTree-backed), and the
    /// `hashCode` field is the first 8 hex chars of the SHA-256 of the JSON
    /// without that field, so equal events hash equally.
    pub fn to_json(&self) -> Result<String> {
        let mut event = Map::new();
        event.insert("unique_id".into(), json!(self.unique_id));
        event.insert("event_type".into(), json!(self.event_type));
        event.insert("event_id".into(), json!(self.event_id));
        event.insert("app_id".into(), json!(self.app_id));
        event.insert("timestamp".into(), json!(self.timestamp));

        let info = &self.system_info;
        event.insert("device_id".into(), json!(info.device_id));
        event.insert("device_unique_id".into(), json!(info.device_unique_id));
        event.insert("platform".into(), json!(info.platform));
        event.insert("os_version".into(), json!(info.os_version));
        event.insert("make".into(), json!(info.make));
        event.insert("brand".into(), json!(info.brand));
        event.insert("model".into(), json!(info.model));
        event.insert("locale".into(), json!(info.locale));
        event.insert("carrier".into(), json!(info.carrier));
        event.insert("network_type".into(), json!(self.network_type));
        event.insert("screen_height".into(), json!(info.screen_height));
        event.insert("screen_width".into(), json!(info.screen_width));
        event.insert("zone_offset".into(), json!(info.zone_offset));
        event.insert("system_language".into(), json!(info.system_language));
        event.insert("country_code".into(), json!(info.country_code));
        event.insert("sdk_version".into(), json!(SDK_VERSION));
        event.insert("sdk_name".into(), json!(SDK_NAME));
        event.insert("app_version".into(), json!(info.app_version));
        event.insert("app_package_name".into(), json!(info.app_package_name));
        event.insert("app_title".into(), json!(info.app_title));

        let mut user = Map::new();
        for (key, value) in &self.user_attributes {
            user.insert(key.clone(), value.clone());
        }
        event.insert("user".into(), Value::Object(user));

        let mut attributes = Map::new();
        for (key, value) in &self.attributes {
            attributes.insert(key.clone(), value.to_json());
        }
        if let Some(session) = &self.session {
            attributes.insert(reserved::SESSION_ID.into(), json!(session.session_id));
            attributes.insert(
                reserved::SESSION_START_TIMESTAMP.into(),
                json!(session.start_time),
            );
            attributes.insert(reserved::SESSION_DURATION.into(), json!(session.duration()));
            attributes.insert(reserved::SESSION_NUMBER.into(), json!(session.session_index));
        }
        event.insert("attributes".into(), Value::Object(attributes));

        let canonical = serde_json::to_string(&event)?;
        let digest = Sha256::digest(canonical.as_bytes());
        let hash_code: String = hex::encode(digest).chars().take(8).collect();
        event.insert("hashCode".into(), json!(hash_code));

        Ok(serde_json::to_string(&Value::Object(event))?)
    }
}
