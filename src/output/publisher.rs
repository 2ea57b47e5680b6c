//! Batch publisher
//!
//! The single consumer of the result channel. Records are buffered until a
//! full batch is known not to be the last one (or the channel closes), then
//! the batch is published synchronously, so batches reach the sink strictly
//! in `batch_index` order. A batch the sink will not take after
//! `publish_retries` retries is spilled to the spool directory.

use crate::config::Config;
use crate::extract::{Record, Schema};
use crate::output::sink::PublishSink;
use crate::output::spill::spill_batch;
use crate::output::PublishError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sweep metadata attached to every batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub sweep_id: String,
    pub batch_index: u64,
    /// Set only on the final batch, to `batch_index + 1`
    pub total_batches_hint: Option<u64>,
    pub timestamp: String,
    pub extractor: String,
    pub config_fingerprint: String,
}

/// JSON body delivered to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub schema: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub metadata: BatchMetadata,
}

impl BatchPayload {
    /// Rows as JSON objects keyed by field name
    pub fn row_objects(&self) -> impl Iterator<Item = serde_json::Map<String, serde_json::Value>> + '_ {
        self.rows.iter().map(|row| {
            self.schema
                .iter()
                .zip(row)
                .map(|(field, value)| (field.clone(), serde_json::Value::String(value.clone())))
                .collect()
        })
    }
}

/// Publisher knobs, taken from `[publisher]` plus the sweep identity
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub sweep_id: String,
    pub extractor: String,
    pub config_fingerprint: String,
    pub batch_publish: usize,
    pub publish_retries: u32,
    pub backoff_factor: f64,
    pub spool_dir: PathBuf,
}

impl PublisherSettings {
    /// `extractor` is the id of the extractor actually running the sweep,
    /// which may differ from `sweep.extractor` when one is injected
    pub fn from_config(
        config: &Config,
        sweep_id: &str,
        extractor: &str,
        config_fingerprint: &str,
    ) -> Self {
        Self {
            sweep_id: sweep_id.to_string(),
            extractor: extractor.to_string(),
            config_fingerprint: config_fingerprint.to_string(),
            batch_publish: config.publisher.batch_publish.max(1),
            publish_retries: config.publisher.publish_retries,
            backoff_factor: config.publisher.publish_backoff_factor,
            spool_dir: config.publisher.spool_dir.clone(),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16) as i32;
        Duration::from_secs_f64((self.backoff_factor * 2f64.powi(exponent)).max(0.0))
    }
}

/// What the publisher did over the whole sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Records received from workers
    pub records_received: u64,
    pub batches_published: u64,
    pub rows_published: u64,
    /// Sink calls, including failed ones
    pub publish_attempts: u64,
    pub spill_files: Vec<PathBuf>,
    pub rows_spilled: u64,
    /// Rows lost because neither the sink nor the spool accepted them
    pub rows_lost: u64,
    /// Per field, how many received records carried a non-empty value
    pub field_totals: BTreeMap<String, u64>,
}

/// Single consumer of the result channel
pub struct BatchPublisher {
    settings: PublisherSettings,
    schema: Arc<Schema>,
    sink: Arc<dyn PublishSink>,
}

impl BatchPublisher {
    /// Creates a publisher
    ///
    /// # Arguments
    ///
    /// * `settings` - Batch size, retry policy, spool directory, sweep identity
    /// * `schema` - The extractor's schema, sent with every batch
    /// * `sink` - Where batches go
    pub fn new(settings: PublisherSettings, schema: Arc<Schema>, sink: Arc<dyn PublishSink>) -> Self {
        Self {
            settings,
            schema,
            sink,
        }
    }

    /// Drains the result channel until every sender is gone
    ///
    /// Sweep cancellation does not reach the publisher: records already
    /// extracted get the full retry budget during drain, and the run ends once
    /// the workers drop their senders.
    pub async fn run(self, mut results: mpsc::Receiver<Record>) -> PublishSummary {
        let batch_size = self.settings.batch_publish;
        let mut summary = PublishSummary {
            field_totals: self
                .schema
                .fields()
                .iter()
                .map(|f| (f.clone(), 0))
                .collect(),
            ..PublishSummary::default()
        };
        let mut buffer: Vec<Record> = Vec::with_capacity(batch_size);
        let mut next_index = 0u64;

        while let Some(record) = results.recv().await {
            if buffer.len() >= batch_size {
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                self.flush(batch, next_index, false, &mut summary).await;
                next_index += 1;
            }

            summary.records_received += 1;
            for (field, value) in self.schema.fields().iter().zip(record.values()) {
                if !value.trim().is_empty() {
                    *summary.field_totals.entry(field.clone()).or_insert(0) += 1;
                }
            }
            buffer.push(record);
        }

        if !buffer.is_empty() {
            self.flush(buffer, next_index, true, &mut summary).await;
        }

        tracing::info!(
            batches = summary.batches_published,
            rows = summary.rows_published,
            spilled = summary.rows_spilled,
            "Publisher finished"
        );
        summary
    }

    fn build_payload(&self, records: Vec<Record>, batch_index: u64, last: bool) -> BatchPayload {
        BatchPayload {
            schema: self.schema.fields().to_vec(),
            rows: records.into_iter().map(Record::into_values).collect(),
            metadata: BatchMetadata {
                sweep_id: self.settings.sweep_id.clone(),
                batch_index,
                total_batches_hint: last.then_some(batch_index + 1),
                timestamp: chrono::Utc::now().to_rfc3339(),
                extractor: self.settings.extractor.clone(),
                config_fingerprint: self.settings.config_fingerprint.clone(),
            },
        }
    }

    async fn flush(
        &self,
        records: Vec<Record>,
        batch_index: u64,
        last: bool,
        summary: &mut PublishSummary,
    ) {
        // Built once: every retry sends the same bytes
        let payload = self.build_payload(records, batch_index, last);
        let rows = payload.rows.len() as u64;
        let mut attempt = 0u32;

        let failure = loop {
            attempt += 1;
            summary.publish_attempts += 1;

            let error = match self.sink.publish(&payload).await {
                Ok(()) => {
                    summary.batches_published += 1;
                    summary.rows_published += rows;
                    tracing::info!(batch = batch_index, rows, attempt, "Batch published");
                    return;
                }
                Err(e) => e,
            };

            if matches!(error, PublishError::Permanent(_)) || attempt > self.settings.publish_retries {
                break error;
            }

            let delay = self.settings.backoff(attempt);
            tracing::warn!(
                batch = batch_index,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        tracing::warn!(batch = batch_index, error = %failure, "Giving up on batch, spilling");
        match spill_batch(&self.settings.spool_dir, &payload).await {
            Ok(path) => {
                tracing::warn!(batch = batch_index, rows, path = %path.display(), "Batch spilled");
                summary.rows_spilled += rows;
                summary.spill_files.push(path);
            }
            Err(e) => {
                tracing::error!(batch = batch_index, rows, error = %e, "Failed to spill batch");
                summary.rows_lost += rows;
            }
        }
    }
}
