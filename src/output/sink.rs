//! Publish sinks
//!
//! A sink receives complete batch payloads from the publisher. Delivery is
//! all-or-nothing per batch; the publisher owns retries and spilling.

use crate::output::publisher::BatchPayload;
use crate::output::spill::write_ndjson;
use crate::output::PublishError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Destination for published batches
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Human-readable destination, used in logs and the report
    fn describe(&self) -> String;

    /// Delivers one batch
    ///
    /// The same payload may be delivered more than once when an earlier
    /// attempt failed; sinks are expected to key on `metadata.batch_index`.
    async fn publish(&self, payload: &BatchPayload) -> Result<(), PublishError>;
}

/// POSTs each batch as JSON to an HTTP endpoint
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PublishSink for HttpSink {
    fn describe(&self) -> String {
        self.endpoint.to_string()
    }

    async fn publish(&self, payload: &BatchPayload) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    PublishError::Permanent(e.to_string())
                } else {
                    PublishError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            // Every non-2xx answer is retried
            Err(PublishError::Transient(format!("sink answered {}", status)))
        }
    }
}

/// Writes each batch to `batch-<sweep_id>-<index>.ndjson` in a directory
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, payload: &BatchPayload) -> PathBuf {
        self.dir.join(format!(
            "batch-{}-{}.ndjson",
            payload.metadata.sweep_id, payload.metadata.batch_index
        ))
    }
}

#[async_trait]
impl PublishSink for FileSink {
    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }

    async fn publish(&self, payload: &BatchPayload) -> Result<(), PublishError> {
        let path = self.path_for(payload);
        write_ndjson(&path, payload)
            .await
            .map_err(|e| PublishError::Transient(format!("{}: {}", path.display(), e)))
    }
}
