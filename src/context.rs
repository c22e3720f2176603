//! Top-level wiring of the pipeline
//!
//! [`Clickstream`] assembles preferences, the event store, the recorder,
//! the session client, and the analytics client into one handle the host
//! application drives.

use std::sync::Arc;
use std::time::Duration;

use crate::analytics::{AnalyticsClient, EventRecording};
use crate::config::ClickstreamConfig;
use crate::error::Result;
use crate::event::AttributeValue;
use crate::network::{NetworkMonitor, SharedNetworkMonitor};
use crate::prefs::{FilePreferences, Preferences};
use crate::recorder::{EventRecorder, EventUploader, HttpUploader};
use crate::session::{ActivityEvent, Session, SessionClient};
use crate::store::EventStore;
use crate::system::SystemInfo;

/// A fully wired telemetry pipeline
pub struct Clickstream {
    analytics: Arc<AnalyticsClient>,
    session_client: Arc<SessionClient>,
    recorder: Arc<EventRecorder>,
    network: Arc<SharedNetworkMonitor>,
}

impl Clickstream {
    /// Initialize with on-disk storage at the XDG default paths
    pub fn init(config: ClickstreamConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(ClickstreamConfig::data_dir())?;
        std::fs::create_dir_all(ClickstreamConfig::state_dir())?;
        let prefs: Arc<dyn Preferences> = Arc::new(FilePreferences::open(
            ClickstreamConfig::preferences_path(),
        )?);
        let store = Arc::new(EventStore::open(&ClickstreamConfig::database_path())?);
        let system_info = SystemInfo::collect(&*prefs);
        let uploader: Arc<dyn EventUploader> =
            Arc::new(HttpUploader::new(&config, &system_info.platform)?);
        Self::init_with(config, prefs, store, uploader)
    }

    /// Initialize with caller-supplied storage and uploader
    pub fn init_with(
        config: ClickstreamConfig,
        prefs: Arc<dyn Preferences>,
        store: Arc<EventStore>,
        uploader: Arc<dyn EventUploader>,
    ) -> Result<Self> {
        let network = Arc::new(SharedNetworkMonitor::new(
            true,
            crate::network::network_type::UNKNOWN,
        ));
        let recorder = Arc::new(EventRecorder::new(
            store,
            Arc::clone(&prefs),
            Arc::clone(&network) as Arc<dyn NetworkMonitor>,
            uploader,
            &config,
        )?);
        recorder.start_auto_flush(Duration::from_millis(config.send_events_interval_ms))?;

        let session_client = Arc::new(SessionClient::new(Arc::clone(&prefs), &config));
        let provider = {
            let session_client = Arc::downgrade(&session_client);
            Box::new(move || {
                session_client
                    .upgrade()
                    .and_then(|client| client.current_session())
            }) as Box<dyn Fn() -> Option<Session> + Send + Sync>
        };
        let analytics = Arc::new(AnalyticsClient::new(
            &config,
            prefs,
            Arc::clone(&network) as Arc<dyn NetworkMonitor>,
            Arc::clone(&recorder) as Arc<dyn EventRecording>,
            provider,
        ));
        session_client.attach_analytics(&analytics);
        tracing::info!(app_id = %config.app_id, "Clickstream initialized");
        Ok(Self {
            analytics,
            session_client,
            recorder,
            network,
        })
    }

    /// Record a custom event with its attributes
    pub fn record_event(
        &self,
        event_type: &str,
        attributes: impl IntoIterator<Item = (String, AttributeValue)>,
    ) -> Result<()> {
        self.analytics.record_event(event_type, attributes)
    }

    /// Deliver an application lifecycle notification
    pub fn process_lifecycle_event(&self, event: ActivityEvent) {
        self.session_client.process(event);
    }

    /// Record a screen transition
    pub fn record_screen_view(&self, screen_name: &str, screen_id: Option<&str>) {
        self.session_client
            .auto_record()
            .record_screen_view(&self.analytics, screen_name, screen_id);
    }

    pub fn add_global_attribute(
        &self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) {
        self.analytics.add_global_attribute(key, value);
    }

    pub fn remove_global_attribute(&self, key: &str) {
        self.analytics.remove_global_attribute(key);
    }

    pub fn add_user_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.analytics.add_user_attribute(key, value);
    }

    pub fn remove_user_attribute(&self, key: &str) {
        self.analytics.remove_user_attribute(key);
    }

    pub fn set_user_id(&self, user_id: Option<&str>) {
        self.analytics.update_user_id(user_id);
    }

    /// Queue an immediate submission pass
    pub fn flush(&self) {
        self.analytics.submit_events(false);
    }

    /// Report a connectivity change from the host platform
    pub fn set_network_state(&self, is_online: bool, network_type: impl Into<String>) {
        self.network.update(is_online, network_type);
    }

    pub fn analytics(&self) -> &Arc<AnalyticsClient> {
        &self.analytics
    }

    pub fn session_client(&self) -> &Arc<SessionClient> {
        &self.session_client
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }
}
