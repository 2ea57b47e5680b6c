//! Output module for publishing records and reporting on a sweep
//!
//! This module handles:
//! - Buffering extracted records and publishing them in batches
//! - Delivering batches to the external sink, or to local files
//! - Spilling batches the sink would not accept
//! - Periodic progress lines and the final sweep report

mod markdown;
mod progress;
mod publisher;
mod report;
mod sink;
mod spill;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use progress::{ProgressEvent, ProgressReporter, ProgressTotals};
pub use publisher::{BatchMetadata, BatchPayload, BatchPublisher, PublishSummary, PublisherSettings};
pub use report::{print_report, SweepReport};
pub use sink::{FileSink, HttpSink, PublishSink};
pub use spill::{spill_batch, spill_file_name, write_ndjson};

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised while delivering one batch
///
/// Both kinds stay inside the publisher: a batch that cannot be delivered is
/// spilled to disk and the sweep carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Worth retrying (network failure, non-2xx answer, full disk)
    #[error("Transient publish failure: {0}")]
    Transient(String),

    /// Retrying cannot help (payload could not be encoded, bad request setup)
    #[error("Permanent publish failure: {0}")]
    Permanent(String),
}

/// Builds the sink described by `[publisher]`
///
/// An endpoint selects [`HttpSink`]; without one, batches are written to
/// files in the spool directory by [`FileSink`].
pub fn sink_from_config(config: &Config) -> crate::Result<Arc<dyn PublishSink>> {
    let publisher = &config.publisher;

    match &publisher.endpoint {
        Some(endpoint) => {
            let url = Url::parse(endpoint)
                .map_err(|e| crate::ConfigError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
            let sink = HttpSink::new(
                url,
                Duration::from_secs_f64(publisher.publish_timeout_seconds),
            )?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(FileSink::new(publisher.spool_dir.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_defaults_to_files() {
        let config = Config::default();
        let sink = sink_from_config(&config).unwrap();
        assert!(sink.describe().starts_with("file:"));
    }

    #[test]
    fn test_http_sink_selected_by_endpoint() {
        let mut config = Config::default();
        config.publisher.endpoint = Some("http://127.0.0.1:9/ingest".to_string());
        let sink = sink_from_config(&config).unwrap();
        assert_eq!(sink.describe(), "http://127.0.0.1:9/ingest");
    }
}
