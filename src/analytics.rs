//! Event assembly and identity
//!
//! The analytics client owns the mutable attribute state: global attributes
//! stamped onto every event, the user attribute profile, and the user
//! identity. Event creation itself takes no lock on that state; the global
//! and user attributes are merged in at record time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{json, Value};

use crate::config::ClickstreamConfig;
use crate::error::Result;
use crate::event::check::{self, EventError};
use crate::event::{reserved, AttributeValue, ClickstreamEvent};
use crate::network::NetworkMonitor;
use crate::prefs::{self, Preferences};
use crate::session::Session;
use crate::system::SystemInfo;

/// Supplies the session stamped onto newly created events
pub type SessionProvider = Box<dyn Fn() -> Option<Session> + Send + Sync>;

/// Persistence seam between the analytics client and the recorder
pub trait EventRecording: Send + Sync {
    /// Serialize and durably store one event
    fn save(&self, event: &ClickstreamEvent) -> Result<()>;
    /// Queue a submission pass
    fn submit(&self, background_mode: bool);
}

struct AttributeState {
    global_attributes: BTreeMap<String, AttributeValue>,
    user_attributes: BTreeMap<String, Value>,
    user_id: Option<String>,
}

pub struct AnalyticsClient {
    app_id: String,
    prefs: Arc<dyn Preferences>,
    system_info: SystemInfo,
    network: Arc<dyn NetworkMonitor>,
    recorder: Arc<dyn EventRecording>,
    session_provider: SessionProvider,
    user_unique_id: RwLock<String>,
    state: Mutex<AttributeState>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// User attribute values are wrapped with the time they were set
fn wrap_user_value(value: Value) -> Value {
    json!({ "value": value, "set_timestamp": now_millis() })
}

impl AnalyticsClient {
    pub fn new(
        config: &ClickstreamConfig,
        prefs: Arc<dyn Preferences>,
        network: Arc<dyn NetworkMonitor>,
        recorder: Arc<dyn EventRecording>,
        session_provider: SessionProvider,
    ) -> Self {
        let system_info = SystemInfo::collect(&*prefs);
        let user_unique_id = prefs::user_unique_id(&*prefs);
        let user_id = prefs::current_user_id(&*prefs);
        let user_attributes = prefs::user_attributes(&*prefs);
        Self {
            app_id: config.app_id.clone(),
            prefs,
            system_info,
            network,
            recorder,
            session_provider,
            user_unique_id: RwLock::new(user_unique_id),
            state: Mutex::new(AttributeState {
                global_attributes: BTreeMap::new(),
                user_attributes,
                user_id,
            }),
        }
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    pub fn user_unique_id(&self) -> String {
        self.user_unique_id.read().unwrap().clone()
    }

    /// Add an attribute stamped onto every subsequent event
    ///
    /// An invalid key or value is replaced by a single synthetic error entry
    /// so that bad instrumentation surfaces in the data instead of vanishing.
    pub fn add_global_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        let mut state = self.state.lock().unwrap();
        let current_number = occupied_count(&state.global_attributes, &key);
        match check::check_attribute(current_number, &key, &value) {
            Some(error) => Self::insert_error(&mut state.global_attributes, error),
            None => {
                state.global_attributes.insert(key, value);
            }
        }
    }

    pub fn remove_global_attribute(&self, key: &str) {
        self.state.lock().unwrap().global_attributes.remove(key);
    }

    /// Add an attribute to the persisted user profile
    pub fn add_user_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        let mut state = self.state.lock().unwrap();
        let current_number = occupied_count(&state.user_attributes, &key);
        match check::check_user_attribute(current_number, &key, &value) {
            Some(error) => {
                state.user_attributes.insert(
                    error.error_key.to_string(),
                    wrap_user_value(Value::String(error.message)),
                );
            }
            None => {
                state
                    .user_attributes
                    .insert(key, wrap_user_value(value.to_json()));
            }
        }
        prefs::save_user_attributes(&*self.prefs, &state.user_attributes);
    }

    pub fn remove_user_attribute(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.user_attributes.remove(key);
        prefs::save_user_attributes(&*self.prefs, &state.user_attributes);
    }

    /// Switch the active user identity
    ///
    /// Logging in resets the profile and restores (or allocates) the unique
    /// id associated with the user id; logging out with `None` keeps the
    /// current unique id and only removes the reserved user id attribute.
    pub fn update_user_id(&self, user_id: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if state.user_id.as_deref() == user_id {
            return;
        }
        state.user_id = user_id.map(String::from);
        prefs::save_current_user_id(&*self.prefs, user_id);
        match user_id {
            Some(id) if !id.is_empty() => {
                state.user_attributes.clear();
                let (unique_id, first_touch) = prefs::new_user_info(&*self.prefs, id);
                tracing::debug!(user_id = id, unique_id = %unique_id, "Switched user identity");
                *self.user_unique_id.write().unwrap() = unique_id;
                state.user_attributes.insert(
                    reserved::USER_FIRST_TOUCH_TIMESTAMP.to_string(),
                    wrap_user_value(json!(first_touch)),
                );
                state.user_attributes.insert(
                    reserved::USER_ID.to_string(),
                    wrap_user_value(Value::String(id.to_string())),
                );
            }
            _ => {
                state.user_attributes.remove(reserved::USER_ID);
            }
        }
        prefs::save_user_attributes(&*self.prefs, &state.user_attributes);
    }

    /// Build an event stamped with identity, session, and device context
    ///
    /// Takes no attribute lock; global and user attributes are merged at
    /// record time. An invalid event type is not dropped, the event carries
    /// a synthetic error entry instead.
    pub fn create_event(&self, event_type: &str) -> ClickstreamEvent {
        let mut event = ClickstreamEvent::new(
            event_type,
            self.app_id.clone(),
            self.user_unique_id(),
            (self.session_provider)(),
            self.system_info.clone(),
            self.network.network_type(),
        );
        if let Some(error) = check::check_event_type(event_type) {
            tracing::warn!(event_type, "Invalid event type: {}", error.message);
            event.add_global_attribute(
                error.error_key.to_string(),
                AttributeValue::String(error.message),
            );
        }
        event
    }

    /// Merge in the global and user attribute state and store the event
    ///
    /// Event-local attributes win over global ones with the same key.
    pub fn record(&self, mut event: ClickstreamEvent) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            for (key, value) in &state.global_attributes {
                if event.attribute(key).is_none() {
                    event.add_global_attribute(key.clone(), value.clone());
                }
            }
            event.set_user_attributes(state.user_attributes.clone());
        }
        self.recorder.save(&event)
    }

    /// Create and record an event with its attributes in one call
    pub fn record_event(
        &self,
        event_type: &str,
        attributes: impl IntoIterator<Item = (String, AttributeValue)>,
    ) -> Result<()> {
        let mut event = self.create_event(event_type);
        for (key, value) in attributes {
            event.add_attribute(key, value);
        }
        self.record(event)
    }

    /// Queue a submission pass on the recorder
    pub fn submit_events(&self, background_mode: bool) {
        self.recorder.submit(background_mode);
    }

    fn insert_error(attributes: &mut BTreeMap<String, AttributeValue>, error: EventError) {
        attributes.insert(
            error.error_key.to_string(),
            AttributeValue::String(error.message),
        );
    }
}

/// Map occupancy as it counts against the size limit; overwriting an
/// existing key consumes no extra capacity
fn occupied_count<V>(map: &BTreeMap<String, V>, key: &str) -> usize {
    if map.contains_key(key) {
        map.len() - 1
    } else {
        map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::limit;
    use crate::network::{network_type, SharedNetworkMonitor};
    use crate::prefs::MemoryPreferences;

    struct CapturingRecorder {
        saved: Mutex<Vec<ClickstreamEvent>>,
        submits: Mutex<Vec<bool>>,
    }

    impl CapturingRecorder {
        fn new() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                submits: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventRecording for CapturingRecorder {
        fn save(&self, event: &ClickstreamEvent) -> Result<()> {
            self.saved.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn submit(&self, background_mode: bool) {
            self.submits.lock().unwrap().push(background_mode);
        }
    }

    fn make_client() -> (Arc<AnalyticsClient>, Arc<CapturingRecorder>) {
        make_client_with_prefs(Arc::new(MemoryPreferences::new()))
    }

    fn make_client_with_prefs(
        prefs: Arc<dyn Preferences>,
    ) -> (Arc<AnalyticsClient>, Arc<CapturingRecorder>) {
        let config = ClickstreamConfig::new("test-app", "https://example.com/collect");
        let recorder = Arc::new(CapturingRecorder::new());
        let network = Arc::new(SharedNetworkMonitor::new(true, network_type::WIFI));
        let client = Arc::new(AnalyticsClient::new(
            &config,
            prefs,
            network,
            Arc::clone(&recorder) as Arc<dyn EventRecording>,
            Box::new(|| None),
        ));
        (client, recorder)
    }

    #[test]
    fn test_record_merges_global_attributes() {
        let (client, recorder) = make_client();
        client.add_global_attribute("channel", "app-store");
        client.record(client.create_event("test_event")).unwrap();

        let saved = recorder.saved.lock().unwrap();
        assert_eq!(
            saved[0].attribute("channel"),
            Some(&AttributeValue::String("app-store".to_string()))
        );
    }

    #[test]
    fn test_event_attribute_wins_over_global() {
        let (client, recorder) = make_client();
        client.add_global_attribute("channel", "global");
        let mut event = client.create_event("test_event");
        event.add_attribute("channel", "local");
        client.record(event).unwrap();

        let saved = recorder.saved.lock().unwrap();
        assert_eq!(
            saved[0].attribute("channel"),
            Some(&AttributeValue::String("local".to_string()))
        );
    }

    #[test]
    fn test_invalid_global_attribute_becomes_error_entry() {
        let (client, recorder) = make_client();
        client.add_global_attribute("9starts_with_digit", "value");
        client.record(client.create_event("test_event")).unwrap();

        let saved = recorder.saved.lock().unwrap();
        assert!(saved[0].attribute("9starts_with_digit").is_none());
        assert!(saved[0].attribute(check::ERROR_NAME_INVALID).is_some());
    }

    #[test]
    fn test_global_attribute_overwrite_is_idempotent_at_capacity() {
        let (client, _recorder) = make_client();
        for i in 0..limit::MAX_NUM_OF_ATTRIBUTES {
            client.add_global_attribute(format!("attr_{i}"), i as i64);
        }
        // Re-adding an existing key at capacity must not trip the size limit
        client.add_global_attribute("attr_0", 42i64);
        let state = client.state.lock().unwrap();
        assert_eq!(
            state.global_attributes.len(),
            limit::MAX_NUM_OF_ATTRIBUTES
        );
        assert_eq!(
            state.global_attributes.get("attr_0"),
            Some(&AttributeValue::Long(42))
        );
        assert!(!state
            .global_attributes
            .contains_key(check::ERROR_ATTRIBUTE_SIZE_EXCEED));
    }

    #[test]
    fn test_user_attributes_are_wrapped_and_persisted() {
        let prefs: Arc<dyn Preferences> = Arc::new(MemoryPreferences::new());
        let (client, recorder) = make_client_with_prefs(Arc::clone(&prefs));
        client.add_user_attribute("plan", "premium");
        client.record(client.create_event("test_event")).unwrap();

        let saved = recorder.saved.lock().unwrap();
        let wrapped = &saved[0].user_attributes()["plan"];
        assert_eq!(wrapped["value"], "premium");
        assert!(wrapped["set_timestamp"].as_i64().unwrap() > 0);

        // The snapshot survives a client restart
        let persisted = prefs::user_attributes(&*prefs);
        assert_eq!(persisted["plan"]["value"], "premium");
    }

    #[test]
    fn test_login_sets_user_id_and_first_touch() {
        let (client, recorder) = make_client();
        client.update_user_id(Some("user-1"));
        client.record(client.create_event("test_event")).unwrap();

        let saved = recorder.saved.lock().unwrap();
        let attrs = saved[0].user_attributes();
        assert_eq!(attrs[reserved::USER_ID]["value"], "user-1");
        assert!(attrs[reserved::USER_FIRST_TOUCH_TIMESTAMP]["value"]
            .as_i64()
            .unwrap()
            > 0);
    }

    #[test]
    fn test_logout_removes_user_id_but_keeps_unique_id() {
        let (client, _recorder) = make_client();
        let anonymous_unique_id = client.user_unique_id();
        client.update_user_id(Some("user-1"));
        client.update_user_id(None);

        let state = client.state.lock().unwrap();
        assert!(!state.user_attributes.contains_key(reserved::USER_ID));
        drop(state);
        // First login associated the anonymous unique id with user-1
        assert_eq!(client.user_unique_id(), anonymous_unique_id);
    }

    #[test]
    fn test_relogin_restores_previous_unique_id() {
        let (client, _recorder) = make_client();
        client.update_user_id(Some("user-1"));
        let first_unique_id = client.user_unique_id();

        client.update_user_id(Some("user-2"));
        let second_unique_id = client.user_unique_id();
        assert_ne!(first_unique_id, second_unique_id);

        client.update_user_id(Some("user-1"));
        assert_eq!(client.user_unique_id(), first_unique_id);
    }

    #[test]
    fn test_login_resets_user_attributes() {
        let (client, _recorder) = make_client();
        client.add_user_attribute("plan", "premium");
        client.update_user_id(Some("user-1"));
        let state = client.state.lock().unwrap();
        assert!(!state.user_attributes.contains_key("plan"));
    }

    #[test]
    fn test_invalid_event_type_yields_error_entry() {
        let (client, _recorder) = make_client();
        let event = client.create_event("event with spaces");
        assert!(event.attribute(check::ERROR_NAME_INVALID).is_some());
    }

    #[test]
    fn test_submit_events_forwards_background_mode() {
        let (client, recorder) = make_client();
        client.submit_events(true);
        client.submit_events(false);
        assert_eq!(*recorder.submits.lock().unwrap(), vec![true, false]);
    }
}
