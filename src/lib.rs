//! # clickstream
//!
//! Client-side event telemetry pipeline: events are validated, stamped with
//! session and device context, persisted to a local SQLite store, and
//! shipped to an ingest endpoint in size-bounded batches.
//!
//! This library provides:
//! - Durable event storage with a hard disk budget and oldest-first eviction
//! - A batch submission engine with sequenced, compressed uploads
//! - Attribute validation that surfaces errors in the data instead of
//!   dropping events
//! - Session lifecycle tracking driven by application state transitions
//! - Automatically recorded preset events (first open, session start,
//!   screen views, user engagement)
//!
//! ## Example
//!
//! ```rust,no_run
//! use clickstream::{ActivityEvent, Clickstream, ClickstreamConfig};
//!
//! let config = ClickstreamConfig::new("my-app", "https://example.com/collect");
//! let pipeline = Clickstream::init(config).expect("failed to initialize");
//!
//! pipeline.process_lifecycle_event(ActivityEvent::ApplicationWillMoveToForeground);
//! pipeline
//!     .record_event("button_click", [("button_id".to_string(), "buy".into())])
//!     .expect("failed to record");
//! ```

// Re-export commonly used items at the crate root
pub use analytics::AnalyticsClient;
pub use config::ClickstreamConfig;
pub use context::Clickstream;
pub use error::{Error, Result};
pub use event::{AttributeValue, ClickstreamEvent};
pub use recorder::EventRecorder;
pub use session::{ActivityEvent, Session, SessionClient};
pub use store::EventStore;

// Public modules
pub mod analytics;
pub mod autorecord;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod logging;
pub mod network;
pub mod prefs;
pub mod recorder;
pub mod session;
pub mod store;
pub mod system;
