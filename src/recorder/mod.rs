//! Durable event recording and batch submission
//!
//! Events land in the SQLite store synchronously; submission drains the
//! store oldest-first on a dedicated worker thread. Uploaded events are
//! deleted only after the server accepts the batch, so a crash or rejected
//! upload never loses data, only duplicates it.

pub mod request;

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::analytics::EventRecording;
use crate::config::ClickstreamConfig;
use crate::error::Result;
use crate::event::batch::BatchEvent;
use crate::event::ClickstreamEvent;
use crate::network::NetworkMonitor;
use crate::prefs::{self, Preferences};
use crate::store::EventStore;

pub use request::{EventUploader, HttpUploader};

/// Upper bound on the JSON array text of one upload
pub const MAX_SUBMISSION_BYTES: usize = 512 * 1024;
/// Upper bound on events per upload
pub const MAX_EVENTS_PER_BATCH: usize = 100;
/// Batches attempted per submission pass
pub const MAX_SUBMISSIONS_PER_CALL: usize = 3;
/// Pending submission requests beyond this are dropped
pub const QUEUE_CAPACITY: usize = 1000;

struct SubmitRequest {
    background_mode: bool,
}

struct Inner {
    store: Arc<EventStore>,
    prefs: Arc<dyn Preferences>,
    network: Arc<dyn NetworkMonitor>,
    uploader: Arc<dyn EventUploader>,
    is_log_events: bool,
}

impl Inner {
    fn save(&self, event: &ClickstreamEvent) -> Result<()> {
        let json = event.to_json()?;
        let size = json.len() as i64;
        let id = self.store.append(&json, size)?;
        if self.is_log_events {
            tracing::debug!(event_json = %json, "Logged event");
        }
        tracing::debug!(event_type = %event.event_type, id, size, "Saved event");
        Ok(())
    }

    fn get_batch_event(&self) -> Result<BatchEvent> {
        let rows = self.store.oldest(MAX_EVENTS_PER_BATCH)?;
        if rows.is_empty() {
            return Ok(BatchEvent::empty());
        }
        let mut events_json = String::from("[");
        let mut event_count = 0;
        let mut last_event_id = -1;
        for row in rows {
            let separator = if event_count == 0 { 0 } else { 1 };
            // +1 for the closing bracket; a batch may reach the bound but
            // never exceed it
            if events_json.len() + separator + row.event_json.len() + 1 > MAX_SUBMISSION_BYTES {
                if event_count == 0 {
                    // A row that exceeds the cap on its own can never ship;
                    // left in place it would stall submission forever
                    tracing::warn!(
                        id = row.id,
                        size = row.event_json.len(),
                        "Dropping event larger than the submission size limit"
                    );
                    self.store.delete_one(row.id)?;
                    continue;
                }
                break;
            }
            if event_count > 0 {
                events_json.push(',');
            }
            events_json.push_str(&row.event_json);
            event_count += 1;
            last_event_id = row.id;
        }
        events_json.push(']');
        Ok(BatchEvent {
            events_json,
            event_count,
            last_event_id,
        })
    }

    fn process_once(&self, background_mode: bool) -> Result<usize> {
        if !self.network.is_online() {
            tracing::debug!("Device is offline, skipping submission");
            return Ok(0);
        }
        if self.store.count()? == 0 {
            return Ok(0);
        }
        let mut submitted = 0;
        for _ in 0..MAX_SUBMISSIONS_PER_CALL {
            let batch = self.get_batch_event()?;
            if batch.event_count == 0 {
                break;
            }
            // The sequence number advances on every attempt so the server
            // can spot gaps and duplicates
            let sequence_id = prefs::bundle_sequence_id(&*self.prefs);
            let accepted = self.uploader.upload(&batch.events_json, sequence_id);
            prefs::save_bundle_sequence_id(&*self.prefs, sequence_id + 1);
            if !accepted {
                tracing::warn!(
                    sequence_id,
                    event_count = batch.event_count,
                    "Batch submission failed, events retained for retry"
                );
                break;
            }
            self.store.delete_up_to(batch.last_event_id)?;
            submitted += batch.event_count;
            tracing::debug!(
                sequence_id,
                event_count = batch.event_count,
                background_mode,
                "Submitted event batch"
            );
        }
        Ok(submitted)
    }
}

/// Records events durably and submits them in the background
pub struct EventRecorder {
    inner: Arc<Inner>,
    submit_tx: SyncSender<SubmitRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
    flush_stop: Mutex<Option<mpsc::Sender<()>>>,
    flush_worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventRecorder {
    pub fn new(
        store: Arc<EventStore>,
        prefs: Arc<dyn Preferences>,
        network: Arc<dyn NetworkMonitor>,
        uploader: Arc<dyn EventUploader>,
        config: &ClickstreamConfig,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            store,
            prefs,
            network,
            uploader,
            is_log_events: config.is_log_events,
        });
        let (submit_tx, submit_rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let worker = Self::spawn_worker(Arc::clone(&inner), submit_rx)?;
        Ok(Self {
            inner,
            submit_tx,
            worker: Mutex::new(Some(worker)),
            flush_stop: Mutex::new(None),
            flush_worker: Mutex::new(None),
        })
    }

    fn spawn_worker(inner: Arc<Inner>, rx: Receiver<SubmitRequest>) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("clickstream-submit".to_string())
            .spawn(move || {
                for request in rx {
                    if let Err(e) = inner.process_once(request.background_mode) {
                        tracing::error!("Submission pass failed: {e}");
                    }
                }
            })?;
        Ok(handle)
    }

    /// Periodically request a submission pass until the recorder is dropped
    pub fn start_auto_flush(&self, interval: Duration) -> Result<()> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let submit_tx = self.submit_tx.clone();
        let handle = std::thread::Builder::new()
            .name("clickstream-flush".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let _ = submit_tx.try_send(SubmitRequest {
                            background_mode: false,
                        });
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })?;
        *self.flush_stop.lock().unwrap() = Some(stop_tx);
        *self.flush_worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Serialize the event and append it to the store
    pub fn save(&self, event: &ClickstreamEvent) -> Result<()> {
        self.inner.save(event)
    }

    /// Assemble the next batch from the oldest stored events
    pub fn get_batch_event(&self) -> Result<BatchEvent> {
        self.inner.get_batch_event()
    }

    /// Run one submission pass on the calling thread
    pub fn process_once(&self, background_mode: bool) -> Result<usize> {
        self.inner.process_once(background_mode)
    }

    /// Queue a submission pass for the worker thread
    pub fn submit(&self, background_mode: bool) {
        let request = SubmitRequest { background_mode };
        match self.submit_tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Submission queue is full, dropping request");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("Submission worker is gone, dropping request");
            }
        }
    }
}

impl EventRecording for EventRecorder {
    fn save(&self, event: &ClickstreamEvent) -> Result<()> {
        EventRecorder::save(self, event)
    }

    fn submit(&self, background_mode: bool) {
        EventRecorder::submit(self, background_mode)
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        if let Some(stop) = self.flush_stop.lock().unwrap().take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.flush_worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        // Dropping the only sender disconnects the worker's receiver
        let (orphan_tx, _) = mpsc::sync_channel(1);
        let _ = std::mem::replace(&mut self.submit_tx, orphan_tx);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
