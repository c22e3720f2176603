//! Ephemeral batch view over stored events
//!
//! A batch is built fresh from the oldest stored rows for each submission
//! attempt and never reused across attempts.

/// One size- and count-bounded group of serialized events
#[derive(Debug, Clone)]
pub struct BatchEvent {
    /// JSON array string, ready to POST
    pub events_json: String,
    /// Number of events in the array
    pub event_count: usize,
    /// Store id of the last included row; -1 when the batch is empty.
    /// Deletion cursor after a successful upload.
    pub last_event_id: i64,
}

impl BatchEvent {
    /// The empty batch
    pub fn empty() -> Self {
        Self {
            events_json: "[]".to_string(),
            event_count: 0,
            last_event_id: -1,
        }
    }
}
