//! State module for tracking sweep progress
//!
//! This module provides state management for targets and for the sweep itself.
//!
//! # Components
//!
//! - `Outcome`: The terminal (or transient) result of processing one target
//! - `Registry`: Thread-safe visited set, failure counts and outcome tally
//! - `SweepState`: The sweep lifecycle state machine

mod outcome;
mod registry;
mod sweep_state;

// Re-export main types
pub use outcome::{
    NotFoundReason, Outcome, OutcomeCategory, PermanentKind, SkipReason, TransientKind,
};
pub use registry::{ClaimResult, Registry, RegistrySnapshot};
pub use sweep_state::SweepState;
