//! Record extractors
//!
//! An extractor maps the raw bytes of one response to zero or more records.
//! Extractors are pure: no I/O, no shared mutable state, deterministic on
//! their input. The sweep engine is configured with exactly one of them, and
//! its schema is fixed for the whole sweep.
//!
//! # Built-in extractors
//!
//! - `members`: member edit pages (HTML, regex based)
//! - `localities`: locality lookup endpoint (JSON, filtered by region terms)
//! - `classes`: class edit pages (HTML form)
//! - `enrolled`: enrolled-student tables (HTML, one record per table row)

mod classes;
mod enrolled;
mod localities;
mod members;
mod record;

use crate::config::ExtractorConfig;
use crate::ConfigError;
use std::sync::Arc;

pub use classes::ClassesExtractor;
pub use enrolled::EnrolledExtractor;
pub use localities::LocalitiesExtractor;
pub use members::MembersExtractor;
pub use record::{builder, ExtractError, Record, RecordBuilder, Schema};

const REGISTERED: [&str; 4] = ["members", "localities", "classes", "enrolled"];

/// What an extractor produced for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The target exists but is not of interest
    Filtered,
    /// One or more rows, in page order
    Rows(Vec<Record>),
}

/// Content type an extractor is able to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentExpectation {
    Html,
    Json,
    Any,
}

impl ContentExpectation {
    /// Returns true if a response with this `Content-Type` may be handed over
    ///
    /// A missing header is accepted; the extractor decides.
    pub fn accepts(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return true;
        };
        let mime = content_type.to_ascii_lowercase();

        match self {
            Self::Html => mime.contains("text/html") || mime.contains("application/xhtml"),
            Self::Json => mime.contains("json") || mime.contains("javascript"),
            Self::Any => true,
        }
    }
}

/// A pluggable record extractor
pub trait Extractor: Send + Sync {
    /// Registry id, e.g. `members`
    fn id(&self) -> &str;

    /// Field names every produced record carries, in order
    fn schema(&self) -> Arc<Schema>;

    fn expects(&self) -> ContentExpectation {
        ContentExpectation::Any
    }

    /// Smallest body this extractor can make sense of
    ///
    /// `None` defers to `http.body-min-size`. Compact formats such as JSON
    /// lookups override it, since `[]` is already a complete answer.
    fn min_body_size(&self) -> Option<usize> {
        None
    }

    /// Parses one response
    ///
    /// # Arguments
    ///
    /// * `target` - The ID the response belongs to
    /// * `body` - Raw (decompressed) response bytes
    /// * `content_type` - The `Content-Type` header, if any
    fn extract(
        &self,
        target: u64,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<Extraction, ExtractError>;
}

/// Ids of the built-in extractors
pub fn available_extractors() -> &'static [&'static str] {
    &REGISTERED
}

pub fn is_registered(id: &str) -> bool {
    REGISTERED.contains(&id)
}

/// Builds a registered extractor by id
///
/// # Returns
///
/// * `Ok(Arc<dyn Extractor>)` - The extractor, ready to share among workers
/// * `Err(ConfigError)` - The id is unknown
pub fn build_extractor(
    id: &str,
    config: &ExtractorConfig,
) -> Result<Arc<dyn Extractor>, ConfigError> {
    let extractor: Arc<dyn Extractor> = match id {
        "members" => Arc::new(
            MembersExtractor::new()
                .map_err(|e| ConfigError::Validation(format!("members extractor: {}", e)))?,
        ),
        "localities" => Arc::new(LocalitiesExtractor::new(
            config.filter_terms.clone(),
            config.sector_terms.clone(),
        )),
        "classes" => Arc::new(ClassesExtractor::new()),
        "enrolled" => Arc::new(EnrolledExtractor::new()),
        other => {
            return Err(ConfigError::UnknownExtractor {
                id: other.to_string(),
                available: REGISTERED.join(", "),
            })
        }
    };
    Ok(extractor)
}

/// Collects the trimmed text of an element, joining inner fragments with spaces
pub(crate) fn element_text(element: &scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn selector(css: &str) -> Result<scraper::Selector, ExtractError> {
    scraper::Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{}: {:?}", css, e)))
}
