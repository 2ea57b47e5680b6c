//! Configuration module for id-sweep
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The CLI layers flag overrides on top of the parsed file before validation.
//!
//! # Example
//!
//! ```no_run
//! use id_sweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sweep.toml")).unwrap();
//! println!("Sweeping {:?} with {} workers", config.sweep.id_range, config.sweep.worker_count);
//! ```

mod parser;
mod template;
mod types;
mod validation;

// Re-export types
pub use template::UrlTemplate;
pub use types::{
    Config, CredentialsConfig, ExtractorConfig, HttpConfig, LoginRedirectPolicy, OutputConfig,
    PublisherConfig, SessionConfig, ShortBodyPolicy, SweepConfig, DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use parser::{config_fingerprint, load_config, read_config};
pub use validation::validate;
