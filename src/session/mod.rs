//! Session lifecycle
//!
//! A session is a contiguous span of foreground activity. Sessions pause on
//! background transitions and are persisted at that moment; a later
//! foreground transition reuses the paused session when it happened within
//! the timeout window, otherwise a new session starts with an incremented
//! index.

pub mod state;

use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde::{Deserialize, Serialize};

use crate::analytics::AnalyticsClient;
use crate::autorecord::AutoRecordEventClient;
use crate::config::ClickstreamConfig;
use crate::prefs::{self, Preferences};

pub use state::{ActivityEvent, ApplicationState, StateMachine};

const SESSION_ID_UNIQUE_LENGTH: usize = 8;
const SESSION_ID_PAD: char = '_';

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One contiguous period of user activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Derived id: `<device id padded/truncated to 8>-<yyyyMMdd>-<HHmmssSSS>`
    pub session_id: String,
    /// Epoch milliseconds of session start
    pub start_time: i64,
    /// Epoch milliseconds of the last pause; `None` for a session that has
    /// never been backgrounded
    pub pause_time: Option<i64>,
    /// Monotonic counter across sessions, persisted with the snapshot
    pub session_index: i64,
}

impl Session {
    /// Start a fresh session for the given device id
    pub fn new(unique_id: &str, session_index: i64) -> Self {
        Self::new_at(unique_id, session_index, now_millis())
    }

    /// Start a fresh session as of the given instant; the session id and
    /// start time both derive from it
    fn new_at(unique_id: &str, session_index: i64, now: i64) -> Self {
        Self {
            session_id: Self::generate_session_id(unique_id, now),
            start_time: now,
            pause_time: None,
            session_index,
        }
    }

    /// A session is new until its first pause
    pub fn is_new(&self) -> bool {
        self.pause_time.is_none()
    }

    /// Milliseconds from start to pause (or to now while active)
    pub fn duration(&self) -> i64 {
        self.pause_time.unwrap_or_else(now_millis) - self.start_time
    }

    /// Mark the session paused as of now
    pub fn pause(&mut self) {
        self.pause_time = Some(now_millis());
    }

    fn generate_session_id(unique_id: &str, now: i64) -> String {
        let mut key: String = unique_id.chars().take(SESSION_ID_UNIQUE_LENGTH).collect();
        while key.chars().count() < SESSION_ID_UNIQUE_LENGTH {
            key.push(SESSION_ID_PAD);
        }
        let instant = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now)
            .unwrap_or_else(chrono::Utc::now);
        format!(
            "{}-{}-{}",
            key,
            instant.format("%Y%m%d"),
            instant.format("%H%M%S%3f")
        )
    }

    /// Compute the current session from the persisted snapshot
    ///
    /// A paused session resumed within the timeout window is reused; outside
    /// the window a new session starts with the next index.
    pub fn current(
        prefs: &dyn Preferences,
        unique_id: &str,
        session_timeout_ms: i64,
    ) -> Session {
        Self::current_at(prefs, unique_id, session_timeout_ms, now_millis())
    }

    fn current_at(
        prefs: &dyn Preferences,
        unique_id: &str,
        session_timeout_ms: i64,
        now: i64,
    ) -> Session {
        match prefs::session(prefs) {
            Some(stored) => match stored.pause_time {
                Some(paused_at) if now - paused_at < session_timeout_ms => stored,
                Some(_) => Session::new_at(unique_id, stored.session_index + 1, now),
                None => stored,
            },
            None => Session::new_at(unique_id, 1, now),
        }
    }
}

struct SessionState {
    machine: StateMachine,
    session: Option<Session>,
}

/// Drives session lifecycle from application lifecycle notifications
///
/// The host delivers [`ActivityEvent`]s via [`SessionClient::process`]; the
/// pure state machine resolves transitions and this client performs the side
/// effects: session persistence, preset-event emission, and a background
/// flush.
pub struct SessionClient {
    prefs: Arc<dyn Preferences>,
    device_id: String,
    session_timeout_ms: i64,
    track_user_engagement: bool,
    state: Mutex<SessionState>,
    analytics: OnceLock<Weak<AnalyticsClient>>,
    auto_record: AutoRecordEventClient,
}

impl SessionClient {
    pub fn new(prefs: Arc<dyn Preferences>, config: &ClickstreamConfig) -> Self {
        let device_id = prefs::device_id(&*prefs);
        let auto_record = AutoRecordEventClient::new(Arc::clone(&prefs), config);
        Self {
            prefs,
            device_id,
            session_timeout_ms: config.session_timeout_ms,
            track_user_engagement: config.is_track_user_engagement_events,
            state: Mutex::new(SessionState {
                machine: StateMachine::new(),
                session: None,
            }),
            analytics: OnceLock::new(),
            auto_record,
        }
    }

    /// Wire the analytics client used for preset events and flushes.
    /// Must be called once during initialization, before lifecycle events
    /// arrive.
    pub fn attach_analytics(&self, analytics: &Arc<AnalyticsClient>) {
        let _ = self.analytics.set(Arc::downgrade(analytics));
    }

    fn analytics(&self) -> Option<Arc<AnalyticsClient>> {
        self.analytics.get().and_then(Weak::upgrade)
    }

    /// The session stamped onto events created right now
    pub fn current_session(&self) -> Option<Session> {
        self.state.lock().unwrap().session.clone()
    }

    /// Preset-event client, for the explicit screen-view API
    pub fn auto_record(&self) -> &AutoRecordEventClient {
        &self.auto_record
    }

    /// Apply a lifecycle event and run the resulting side effects
    pub fn process(&self, event: ActivityEvent) {
        let transition = self.state.lock().unwrap().machine.process(event);
        match transition {
            Some(ApplicationState::RunningInForeground) => self.handle_foreground(),
            Some(ApplicationState::RunningInBackground) => self.handle_background(),
            Some(ApplicationState::Terminated) => self.handle_terminate(),
            Some(ApplicationState::Initializing) | None => {}
        }
    }

    /// (Re)compute the current session, emitting `_session_start` when it is
    /// genuinely new
    pub fn initial_session(&self) {
        let session = Session::current(&*self.prefs, &self.device_id, self.session_timeout_ms);
        let is_new = session.is_new();
        tracing::debug!(session_id = %session.session_id, is_new, "Resolved current session");
        self.state.lock().unwrap().session = Some(session);
        if is_new {
            if let Some(analytics) = self.analytics() {
                self.auto_record.record_session_start(&analytics);
                self.auto_record.set_is_entrances();
            }
        }
    }

    fn handle_foreground(&self) {
        tracing::debug!("Application entered the foreground");
        if let Some(analytics) = self.analytics() {
            self.auto_record.handle_app_start(&analytics);
        }
        self.auto_record.update_engage_timestamp();
        self.initial_session();
    }

    fn handle_background(&self) {
        tracing::debug!("Application entered the background");
        self.store_session();
        if let Some(analytics) = self.analytics() {
            if self.track_user_engagement {
                self.auto_record.record_user_engagement(&analytics);
            }
            analytics.submit_events(true);
        }
    }

    fn handle_terminate(&self) {
        tracing::debug!("Application terminating, ending session");
        self.store_session();
    }

    /// Pause and persist the current session; synchronous, since losing the
    /// snapshot would break session continuity across restarts
    fn store_session(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(session) = state.session.as_mut() {
            session.pause();
            prefs::save_session(&*self.prefs, session);
        }
    }
}
