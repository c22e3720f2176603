//! Automatically recorded preset events
//!
//! First-open, app and OS update detection, session starts, screen views,
//! and user engagement are recorded here so instrumented apps get them
//! without writing any event code.

use std::sync::{Arc, Mutex};

use crate::analytics::AnalyticsClient;
use crate::config::ClickstreamConfig;
use crate::event::{preset, reserved, AttributeValue};
use crate::prefs::{self, Preferences};

/// Foreground time below this is not worth an engagement event
pub const MIN_ENGAGEMENT_TIME_MS: i64 = 1000;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Default)]
struct AutoRecordState {
    /// Next screen view is the first of its session
    is_entrances: bool,
    /// Epoch ms when the app last came to the foreground; 0 before the
    /// first foreground transition
    engage_start: i64,
    last_screen_name: Option<String>,
    last_screen_id: Option<String>,
}

pub struct AutoRecordEventClient {
    prefs: Arc<dyn Preferences>,
    track_screen_views: bool,
    state: Mutex<AutoRecordState>,
}

impl AutoRecordEventClient {
    pub fn new(prefs: Arc<dyn Preferences>, config: &ClickstreamConfig) -> Self {
        Self {
            prefs,
            track_screen_views: config.is_track_screen_view_events,
            state: Mutex::new(AutoRecordState::default()),
        }
    }

    /// Run the app-start checks: version updates, then first open
    pub fn handle_app_start(&self, analytics: &AnalyticsClient) {
        self.check_app_version_update(analytics);
        self.check_os_version_update(analytics);
        self.handle_first_open(analytics);
    }

    fn check_app_version_update(&self, analytics: &AnalyticsClient) {
        let current = analytics.system_info().app_version.clone();
        match prefs::app_version(&*self.prefs) {
            Some(stored) if stored != current => {
                let mut event = analytics.create_event(preset::APP_UPDATE);
                event.add_attribute(reserved::PREVIOUS_APP_VERSION, stored);
                record(analytics, event);
                prefs::save_app_version(&*self.prefs, &current);
            }
            Some(_) => {}
            None => prefs::save_app_version(&*self.prefs, &current),
        }
    }

    fn check_os_version_update(&self, analytics: &AnalyticsClient) {
        let current = analytics.system_info().os_version.clone();
        match prefs::os_version(&*self.prefs) {
            Some(stored) if stored != current => {
                let mut event = analytics.create_event(preset::OS_UPDATE);
                event.add_attribute(reserved::PREVIOUS_OS_VERSION, stored);
                record(analytics, event);
                prefs::save_os_version(&*self.prefs, &current);
            }
            Some(_) => {}
            None => prefs::save_os_version(&*self.prefs, &current),
        }
    }

    fn handle_first_open(&self, analytics: &AnalyticsClient) {
        if prefs::is_first_open(&*self.prefs) {
            record(analytics, analytics.create_event(preset::FIRST_OPEN));
            prefs::save_first_open_done(&*self.prefs);
        }
    }

    pub fn record_session_start(&self, analytics: &AnalyticsClient) {
        record(analytics, analytics.create_event(preset::SESSION_START));
    }

    /// Mark the next screen view as the session entrance
    pub fn set_is_entrances(&self) {
        self.state.lock().unwrap().is_entrances = true;
    }

    /// Restart the engagement clock, called on foreground transitions
    pub fn update_engage_timestamp(&self) {
        self.state.lock().unwrap().engage_start = now_millis();
    }

    /// Record foreground engagement time, if long enough to matter
    pub fn record_user_engagement(&self, analytics: &AnalyticsClient) {
        let engage_start = self.state.lock().unwrap().engage_start;
        if engage_start <= 0 {
            return;
        }
        let engagement_time = now_millis() - engage_start;
        if engagement_time <= MIN_ENGAGEMENT_TIME_MS {
            return;
        }
        let mut event = analytics.create_event(preset::USER_ENGAGEMENT);
        event.add_attribute(reserved::ENGAGEMENT_TIMESTAMP, engagement_time);
        record(analytics, event);
    }

    /// Record a screen transition, carrying the previous screen and whether
    /// this is the session entrance
    pub fn record_screen_view(
        &self,
        analytics: &AnalyticsClient,
        screen_name: &str,
        screen_id: Option<&str>,
    ) {
        if !self.track_screen_views {
            return;
        }
        let screen_id = screen_id.unwrap_or(screen_name);
        let mut state = self.state.lock().unwrap();
        if state.last_screen_name.as_deref() == Some(screen_name)
            && state.last_screen_id.as_deref() == Some(screen_id)
        {
            tracing::debug!(screen_name, "Skipping repeated screen view");
            return;
        }

        let mut event = analytics.create_event(preset::SCREEN_VIEW);
        event.add_attribute(reserved::SCREEN_NAME, screen_name);
        event.add_attribute(reserved::SCREEN_ID, screen_id);
        if let Some(previous_name) = &state.last_screen_name {
            event.add_attribute(reserved::PREVIOUS_SCREEN_NAME, previous_name.clone());
        }
        if let Some(previous_id) = &state.last_screen_id {
            event.add_attribute(reserved::PREVIOUS_SCREEN_ID, previous_id.clone());
        }
        event.add_attribute(
            reserved::ENTRANCES,
            AttributeValue::Long(i64::from(state.is_entrances)),
        );

        state.last_screen_name = Some(screen_name.to_string());
        state.last_screen_id = Some(screen_id.to_string());
        state.is_entrances = false;
        drop(state);
        record(analytics, event);
    }
}

/// Preset events must not panic the host app; storage failures are logged
fn record(analytics: &AnalyticsClient, event: crate::event::ClickstreamEvent) {
    let event_type = event.event_type.clone();
    if let Err(e) = analytics.record(event) {
        tracing::error!(event_type, "Failed to record preset event: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::EventRecording;
    use crate::error::Result;
    use crate::event::ClickstreamEvent;
    use crate::network::{network_type, SharedNetworkMonitor};
    use crate::prefs::MemoryPreferences;

    struct CapturingRecorder {
        saved: Mutex<Vec<ClickstreamEvent>>,
    }

    impl EventRecording for CapturingRecorder {
        fn save(&self, event: &ClickstreamEvent) -> Result<()> {
            self.saved.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn submit(&self, _background_mode: bool) {}
    }

    struct Fixture {
        analytics: Arc<AnalyticsClient>,
        recorder: Arc<CapturingRecorder>,
        client: AutoRecordEventClient,
        prefs: Arc<dyn Preferences>,
    }

    impl Fixture {
        fn new() -> Self {
            let prefs: Arc<dyn Preferences> = Arc::new(MemoryPreferences::new());
            let config = ClickstreamConfig::new("test-app", "https://example.com/collect");
            let recorder = Arc::new(CapturingRecorder {
                saved: Mutex::new(Vec::new()),
            });
            let network = Arc::new(SharedNetworkMonitor::new(true, network_type::WIFI));
            let analytics = Arc::new(AnalyticsClient::new(
                &config,
                Arc::clone(&prefs),
                network,
                Arc::clone(&recorder) as Arc<dyn EventRecording>,
                Box::new(|| None),
            ));
            let client = AutoRecordEventClient::new(Arc::clone(&prefs), &config);
            Self {
                analytics,
                recorder,
                client,
                prefs,
            }
        }

        fn event_types(&self) -> Vec<String> {
            self.recorder
                .saved
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type.clone())
                .collect()
        }
    }

    #[test]
    fn test_first_open_recorded_once() {
        let fx = Fixture::new();
        fx.client.handle_app_start(&fx.analytics);
        fx.client.handle_app_start(&fx.analytics);
        let types = fx.event_types();
        assert_eq!(
            types.iter().filter(|t| *t == preset::FIRST_OPEN).count(),
            1
        );
    }

    #[test]
    fn test_app_update_recorded_with_previous_version() {
        let fx = Fixture::new();
        prefs::save_app_version(&*fx.prefs, "0.9.0");
        fx.client.handle_app_start(&fx.analytics);

        let saved = fx.recorder.saved.lock().unwrap();
        let update = saved
            .iter()
            .find(|e| e.event_type == preset::APP_UPDATE)
            .expect("app update event");
        assert_eq!(
            update.attribute(reserved::PREVIOUS_APP_VERSION),
            Some(&AttributeValue::String("0.9.0".to_string()))
        );
        drop(saved);
        // Version stored, so a second start records no further update
        let before = fx.event_types().len();
        fx.client.handle_app_start(&fx.analytics);
        let after: Vec<String> = fx.event_types();
        assert_eq!(after.len(), before);
    }

    #[test]
    fn test_no_update_event_on_genuine_first_start() {
        let fx = Fixture::new();
        fx.client.handle_app_start(&fx.analytics);
        let types = fx.event_types();
        assert!(!types.contains(&preset::APP_UPDATE.to_string()));
        assert!(!types.contains(&preset::OS_UPDATE.to_string()));
    }

    #[test]
    fn test_engagement_below_threshold_not_recorded() {
        let fx = Fixture::new();
        fx.client.update_engage_timestamp();
        fx.client.record_user_engagement(&fx.analytics);
        assert!(fx.event_types().is_empty());
    }

    #[test]
    fn test_engagement_not_recorded_before_first_foreground() {
        let fx = Fixture::new();
        fx.client.record_user_engagement(&fx.analytics);
        assert!(fx.event_types().is_empty());
    }

    #[test]
    fn test_engagement_recorded_after_threshold() {
        let fx = Fixture::new();
        {
            let mut state = fx.client.state.lock().unwrap();
            state.engage_start = now_millis() - MIN_ENGAGEMENT_TIME_MS - 500;
        }
        fx.client.record_user_engagement(&fx.analytics);

        let saved = fx.recorder.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].event_type, preset::USER_ENGAGEMENT);
        match saved[0].attribute(reserved::ENGAGEMENT_TIMESTAMP) {
            Some(AttributeValue::Long(ms)) => assert!(*ms > MIN_ENGAGEMENT_TIME_MS),
            other => panic!("unexpected engagement attribute: {other:?}"),
        }
    }

    #[test]
    fn test_screen_view_tracks_previous_screen_and_entrances() {
        let fx = Fixture::new();
        fx.client.set_is_entrances();
        fx.client.record_screen_view(&fx.analytics, "Home", None);
        fx.client
            .record_screen_view(&fx.analytics, "Detail", Some("detail-1"));

        let saved = fx.recorder.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);

        let first = &saved[0];
        assert_eq!(
            first.attribute(reserved::ENTRANCES),
            Some(&AttributeValue::Long(1))
        );
        assert!(first.attribute(reserved::PREVIOUS_SCREEN_NAME).is_none());

        let second = &saved[1];
        assert_eq!(
            second.attribute(reserved::ENTRANCES),
            Some(&AttributeValue::Long(0))
        );
        assert_eq!(
            second.attribute(reserved::PREVIOUS_SCREEN_NAME),
            Some(&AttributeValue::String("Home".to_string()))
        );
        assert_eq!(
            second.attribute(reserved::SCREEN_ID),
            Some(&AttributeValue::String("detail-1".to_string()))
        );
    }

    #[test]
    fn test_repeated_screen_view_is_skipped() {
        let fx = Fixture::new();
        fx.client.record_screen_view(&fx.analytics, "Home", None);
        fx.client.record_screen_view(&fx.analytics, "Home", None);
        assert_eq!(fx.event_types().len(), 1);
    }

    #[test]
    fn test_screen_views_disabled_by_config() {
        let prefs: Arc<dyn Preferences> = Arc::new(MemoryPreferences::new());
        let mut config = ClickstreamConfig::new("test-app", "https://example.com/collect");
        config.is_track_screen_view_events = false;
        let fx = Fixture::new();
        let client = AutoRecordEventClient::new(prefs, &config);
        client.record_screen_view(&fx.analytics, "Home", None);
        assert!(fx.event_types().is_empty());
    }
}
