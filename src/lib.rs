//! id-sweep: a bounded-parallelism ID-sweep scraper
//!
//! This crate sweeps an inclusive range of numeric IDs against a parameterised
//! endpoint of an authenticated web application, parses each response with a
//! pluggable extractor, and streams the resulting rows to a batch publisher.

#![deny(unused_doc_comments)]

pub mod config;
pub mod extract;
pub mod output;
pub mod session;
pub mod state;
pub mod sweep;

use thiserror::Error;

/// Main error type for sweep operations
///
/// Per-target failures never surface here; they are recorded as
/// [`state::Outcome`] values in the registry. Only configuration, authentication
/// and infrastructure failures propagate to the orchestrator.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid sweep state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SweepState,
        to: state::SweepState,
    },

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid endpoint template: {0}")]
    InvalidTemplate(String),

    #[error("Unknown extractor '{id}' (available: {available})")]
    UnknownExtractor { id: String, available: String },
}

/// Authentication errors
///
/// Every variant is fatal for the sweep when raised before `Running`.
/// Mid-sweep expiry is not an error; it aborts through `AbortReason::AuthExpired`
/// when `fatal_abort_on_auth_expired` is set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Cookie store exhausted: {0}")]
    Exhausted(String),

    #[error("Invalid cookie data: {0}")]
    InvalidCookies(String),
}

/// Result type alias for sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::{Extraction, Extractor, Record, Schema};
pub use state::{Outcome, Registry, SweepState};
pub use sweep::{Coordinator, SweepControl};
