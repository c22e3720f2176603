//! HTTP delivery of event batches

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;

use crate::config::ClickstreamConfig;
use crate::error::{Error, Result};

/// Request timeout for a single batch upload
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivery seam for event batches
///
/// Returns `true` only when the server accepted the batch; any transport
/// failure or non-200 status is `false`, leaving the events in the store
/// for a later attempt.
pub trait EventUploader: Send + Sync {
    fn upload(&self, events_json: &str, bundle_sequence_id: i64) -> bool;
}

/// Ships batches to the ingest endpoint over HTTPS
///
/// Bridges the async `reqwest` client with a private current-thread runtime
/// so callers stay synchronous.
pub struct HttpUploader {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    endpoint: String,
    app_id: String,
    platform: String,
    compress: bool,
    auth_cookie: Option<String>,
}

impl HttpUploader {
    pub fn new(config: &ClickstreamConfig, platform: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            client,
            runtime,
            endpoint: config.endpoint.clone(),
            app_id: config.app_id.clone(),
            platform: platform.to_string(),
            compress: config.is_compress_events,
            auth_cookie: config.auth_cookie.clone(),
        })
    }
}

impl EventUploader for HttpUploader {
    fn upload(&self, events_json: &str, bundle_sequence_id: i64) -> bool {
        let (body, compression) = if self.compress {
            match gzip(events_json) {
                Ok(bytes) => (bytes, "gzip"),
                Err(e) => {
                    tracing::error!("Failed to compress event batch: {e}");
                    return false;
                }
            }
        } else {
            (events_json.as_bytes().to_vec(), "")
        };

        let sequence_id = bundle_sequence_id.to_string();
        let result = self.runtime.block_on(async {
            let mut request = self
                .client
                .post(&self.endpoint)
                .query(&[
                    ("platform", self.platform.as_str()),
                    ("appId", self.app_id.as_str()),
                    ("compression", compression),
                    ("event_bundle_sequence_id", sequence_id.as_str()),
                ])
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(body);
            if let Some(cookie) = &self.auth_cookie {
                request = request.header(COOKIE, cookie);
            }
            request.send().await
        });

        match result {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    sequence_id = bundle_sequence_id,
                    "Server rejected event batch"
                );
                false
            }
            Err(e) => {
                tracing::warn!(sequence_id = bundle_sequence_id, "Upload failed: {e}");
                false
            }
        }
    }
}

fn gzip(input: &str) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input.as_bytes())?;
    encoder.finish()
}
