//! Persisted key-value state
//!
//! Small pieces of pipeline state must survive process restarts: the device
//! id, the user identity association table, the current session snapshot, the
//! upload bundle sequence id. This module provides a `Preferences` trait with
//! a write-through JSON file implementation for production and an in-memory
//! implementation for tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::error::Result;
use crate::session::Session;

/// Preference keys, namespaced to avoid collisions with host state
mod keys {
    pub const DEVICE_ID: &str = "clickstream.device_id";
    pub const USER_ID: &str = "clickstream.user_id";
    pub const USER_UNIQUE_ID: &str = "clickstream.user_unique_id";
    pub const USER_FIRST_TOUCH_TIMESTAMP: &str = "clickstream.user_first_touch_timestamp";
    pub const USER_ATTRIBUTES: &str = "clickstream.user_attributes";
    pub const USER_INFO: &str = "clickstream.user_info";
    pub const APP_VERSION: &str = "clickstream.app_version";
    pub const OS_VERSION: &str = "clickstream.os_version";
    pub const SESSION: &str = "clickstream.session";
    pub const IS_FIRST_OPEN: &str = "clickstream.is_first_open";
    pub const BUNDLE_SEQUENCE_ID: &str = "clickstream.bundle_sequence_id";
}

/// Durable key-value storage for pipeline state
///
/// Writes are synchronous: by the time `put` returns the value is persisted.
/// Losing a session snapshot or the bundle sequence id would corrupt session
/// continuity or upload ordering across restarts.
pub trait Preferences: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> Option<Value>;
    /// Store a value, replacing any previous value for the key
    fn put(&self, key: &str, value: Value);
    /// Remove a key; absent keys are a no-op
    fn remove(&self, key: &str);
}

/// File-backed preferences, persisted as one JSON object
pub struct FilePreferences {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, Value>>,
}

impl FilePreferences {
    /// Open (or create) the preferences file at the given path
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cache = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt preferences file, starting fresh");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn persist(&self, cache: &BTreeMap<String, Value>) {
        match serde_json::to_vec_pretty(cache) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist preferences");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize preferences"),
        }
    }
}

impl Preferences for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key.to_string(), value);
        self.persist(&cache);
    }

    fn remove(&self, key: &str) {
        let mut cache = self.cache.lock().unwrap();
        if cache.remove(key).is_some() {
            self.persist(&cache);
        }
    }
}

/// In-memory preferences for tests
#[derive(Default)]
pub struct MemoryPreferences {
    cache: Mutex<BTreeMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.cache.lock().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Get the stable device id, creating and persisting one on first use
pub fn device_id(prefs: &dyn Preferences) -> String {
    if let Some(Value::String(id)) = prefs.get(keys::DEVICE_ID) {
        return id;
    }
    let id = uuid::Uuid::new_v4().to_string();
    prefs.put(keys::DEVICE_ID, Value::String(id.clone()));
    id
}

/// Get the current user unique id, creating one (and recording the first
/// touch timestamp) on first use
pub fn user_unique_id(prefs: &dyn Preferences) -> String {
    if let Some(Value::String(id)) = prefs.get(keys::USER_UNIQUE_ID) {
        return id;
    }
    let id = uuid::Uuid::new_v4().to_string();
    prefs.put(keys::USER_UNIQUE_ID, Value::String(id.clone()));
    save_user_first_touch_timestamp(prefs);
    tracing::info!(user_unique_id = %id, "Created new user unique id");
    id
}

fn save_user_unique_id(prefs: &dyn Preferences, id: &str) {
    prefs.put(keys::USER_UNIQUE_ID, Value::String(id.to_string()));
}

/// First touch timestamp for the current user, 0 when unknown
pub fn user_first_touch_timestamp(prefs: &dyn Preferences) -> i64 {
    prefs
        .get(keys::USER_FIRST_TOUCH_TIMESTAMP)
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

fn save_user_first_touch_timestamp(prefs: &dyn Preferences) {
    let ts = now_millis();
    prefs.put(keys::USER_FIRST_TOUCH_TIMESTAMP, json!(ts));
    let mut attributes = user_attributes(prefs);
    attributes.insert(
        crate::event::reserved::USER_FIRST_TOUCH_TIMESTAMP.to_string(),
        json!({ "value": ts, "set_timestamp": ts }),
    );
    save_user_attributes(prefs, &attributes);
}

/// Get the current (host-assigned) user id, if any
pub fn current_user_id(prefs: &dyn Preferences) -> Option<String> {
    match prefs.get(keys::USER_ID) {
        Some(Value::String(id)) => Some(id),
        _ => None,
    }
}

/// Persist the current user id; `None` clears it
pub fn save_current_user_id(prefs: &dyn Preferences, user_id: Option<&str>) {
    match user_id {
        Some(id) => prefs.put(keys::USER_ID, Value::String(id.to_string())),
        None => prefs.remove(keys::USER_ID),
    }
}

/// Get the persisted user attribute snapshot
pub fn user_attributes(prefs: &dyn Preferences) -> BTreeMap<String, Value> {
    match prefs.get(keys::USER_ATTRIBUTES) {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

/// Persist the user attribute snapshot
pub fn save_user_attributes(prefs: &dyn Preferences, attributes: &BTreeMap<String, Value>) {
    prefs.put(
        keys::USER_ATTRIBUTES,
        Value::Object(attributes.clone().into_iter().collect()),
    );
}

/// Resolve the identity record for a user id, creating or switching the user
/// unique id as needed
///
/// Three cases, mirroring the per-user association table:
/// - first login ever: associate the existing unique id with this user id
/// - known user id: switch back to that user's unique id
/// - new user id: allocate a fresh unique id and first touch timestamp
pub fn new_user_info(prefs: &dyn Preferences, user_id: &str) -> (String, i64) {
    let mut all_user_info = match prefs.get(keys::USER_INFO) {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    if all_user_info.is_empty() {
        let unique_id = user_unique_id(prefs);
        let first_touch = user_first_touch_timestamp(prefs);
        all_user_info.insert(
            user_id.to_string(),
            json!({ "user_unique_id": unique_id, "user_first_touch_timestamp": first_touch }),
        );
        prefs.put(keys::USER_INFO, Value::Object(all_user_info));
        (unique_id, first_touch)
    } else if let Some(info) = all_user_info.get(user_id) {
        let unique_id = info["user_unique_id"].as_str().unwrap_or_default().to_string();
        let first_touch = info["user_first_touch_timestamp"].as_i64().unwrap_or(0);
        save_user_unique_id(prefs, &unique_id);
        (unique_id, first_touch)
    } else {
        let unique_id = uuid::Uuid::new_v4().to_string();
        let first_touch = now_millis();
        save_user_unique_id(prefs, &unique_id);
        all_user_info.insert(
            user_id.to_string(),
            json!({ "user_unique_id": unique_id, "user_first_touch_timestamp": first_touch }),
        );
        prefs.put(keys::USER_INFO, Value::Object(all_user_info));
        (unique_id, first_touch)
    }
}

/// Load the persisted session snapshot, if any
pub fn session(prefs: &dyn Preferences) -> Option<Session> {
    prefs
        .get(keys::SESSION)
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Persist the session snapshot (synchronous write)
pub fn save_session(prefs: &dyn Preferences, session: &Session) {
    match serde_json::to_value(session) {
        Ok(value) => prefs.put(keys::SESSION, value),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize session"),
    }
}

/// Whether this is the first open of the app on this device
pub fn is_first_open(prefs: &dyn Preferences) -> bool {
    !matches!(prefs.get(keys::IS_FIRST_OPEN), Some(Value::Bool(false)))
}

/// Mark the first open as consumed
pub fn save_first_open_done(prefs: &dyn Preferences) {
    prefs.put(keys::IS_FIRST_OPEN, Value::Bool(false));
}

/// Last app version seen, for `_app_update` detection
pub fn app_version(prefs: &dyn Preferences) -> Option<String> {
    match prefs.get(keys::APP_VERSION) {
        Some(Value::String(v)) => Some(v),
        _ => None,
    }
}

pub fn save_app_version(prefs: &dyn Preferences, version: &str) {
    prefs.put(keys::APP_VERSION, Value::String(version.to_string()));
}

/// Last OS version seen, for `_os_update` detection
pub fn os_version(prefs: &dyn Preferences) -> Option<String> {
    match prefs.get(keys::OS_VERSION) {
        Some(Value::String(v)) => Some(v),
        _ => None,
    }
}

pub fn save_os_version(prefs: &dyn Preferences, version: &str) {
    prefs.put(keys::OS_VERSION, Value::String(version.to_string()));
}

/// Current bundle sequence id, starting at 1
pub fn bundle_sequence_id(prefs: &dyn Preferences) -> i64 {
    prefs
        .get(keys::BUNDLE_SEQUENCE_ID)
        .and_then(|v| v.as_i64())
        .unwrap_or(1)
}

pub fn save_bundle_sequence_id(prefs: &dyn Preferences, id: i64) {
    prefs.put(keys::BUNDLE_SEQUENCE_ID, json!(id));
}
