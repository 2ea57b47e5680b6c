//! Visited / failure registry shared by all workers
//!
//! A single mutex guards the visited set, the failure-count map, the set of
//! targets currently claimed by a worker, and the outcome tally used for
//! progress and the final report. Every operation is a short O(1) critical
//! section, so contention stays low even with many workers.

use crate::state::outcome::{Outcome, OutcomeCategory};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of an atomic claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The caller now owns the target and must record an outcome (or release it)
    ShouldProcess,
    /// A terminal outcome was already recorded
    AlreadyVisited,
    /// The target failed transiently too many times
    OverFailureCap,
    /// Another worker currently holds the claim
    InFlight,
}

/// Point-in-time view of the registry, used for progress and the report
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub visited: usize,
    pub in_flight: usize,
    pub counts: BTreeMap<OutcomeCategory, u64>,
    pub samples: BTreeMap<OutcomeCategory, Vec<u64>>,
    /// Retries spent per target, only for targets that needed any
    pub retries: BTreeMap<u64, u32>,
}

impl RegistrySnapshot {
    pub fn count(&self, category: OutcomeCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    /// Sum of all terminal outcome counts
    pub fn terminal_total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Default)]
struct Inner {
    visited: HashSet<u64>,
    failures: HashMap<u64, u32>,
    in_flight: HashSet<u64>,
    counts: BTreeMap<OutcomeCategory, u64>,
    samples: BTreeMap<OutcomeCategory, Vec<u64>>,
    retries: BTreeMap<u64, u32>,
}

/// Thread-safe visited set and bounded failure counter
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<Inner>,
    max_attempts: u32,
    sample_limit: usize,
}

impl Registry {
    /// Creates an empty registry
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Transient failures allowed before a target is given up
    /// * `sample_limit` - Sample targets kept per outcome category for the report
    pub fn new(max_attempts: u32, sample_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_attempts: max_attempts.max(1),
            sample_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically checks the target and, if eligible, claims it for the caller
    pub fn check_and_claim(&self, target: u64) -> ClaimResult {
        let mut inner = self.lock();

        if inner.failures.get(&target).copied().unwrap_or(0) >= self.max_attempts {
            return ClaimResult::OverFailureCap;
        }
        if inner.visited.contains(&target) {
            return ClaimResult::AlreadyVisited;
        }
        if !inner.in_flight.insert(target) {
            return ClaimResult::InFlight;
        }

        ClaimResult::ShouldProcess
    }

    /// Records the outcome of a claimed target and releases the claim
    ///
    /// Terminal outcomes mark the target visited. A transient error increments
    /// the failure count and only marks the target visited once the cap is
    /// reached. A skip is tallied once for a target that has no terminal outcome
    /// yet, and marks it visited.
    ///
    /// # Returns
    ///
    /// `true` if the target is now terminal
    pub fn record_outcome(&self, target: u64, outcome: &Outcome) -> bool {
        let mut inner = self.lock();
        inner.in_flight.remove(&target);

        let terminal = match outcome {
            Outcome::TransientError(_) => {
                let max = self.max_attempts;
                let count = inner.failures.entry(target).or_insert(0);
                *count = (*count + 1).min(max);
                *count >= max
            }
            Outcome::Skipped(_) => !inner.visited.contains(&target),
            _ => true,
        };

        if terminal && inner.visited.insert(target) {
            let category = outcome.category();
            *inner.counts.entry(category).or_insert(0) += 1;

            if category != OutcomeCategory::Record {
                let limit = self.sample_limit;
                let samples = inner.samples.entry(category).or_default();
                if samples.len() < limit {
                    samples.push(target);
                }
            }
        }

        terminal
    }

    /// Drops a claim without recording an outcome (cancelled mid-target)
    pub fn release(&self, target: u64) {
        self.lock().in_flight.remove(&target);
    }

    /// Adds retries spent by the fetcher on a target
    pub fn note_retries(&self, target: u64, retries: u32) {
        if retries == 0 {
            return;
        }
        *self.lock().retries.entry(target).or_insert(0) += retries;
    }

    pub fn is_visited(&self, target: u64) -> bool {
        self.lock().visited.contains(&target)
    }

    pub fn failure_count(&self, target: u64) -> u32 {
        self.lock().failures.get(&target).copied().unwrap_or(0)
    }

    pub fn retries_for(&self, target: u64) -> u32 {
        self.lock().retries.get(&target).copied().unwrap_or(0)
    }

    /// Copies the current counters out of the lock
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            visited: inner.visited.len(),
            in_flight: inner.in_flight.len(),
            counts: inner.counts.clone(),
            samples: inner.samples.clone(),
            retries: inner.retries.clone(),
        }
    }
}
