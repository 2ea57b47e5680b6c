//! Message-passing progress reporter
//!
//! Workers send one event per finished target. The reporter task owns every
//! counter, so no worker ever touches shared progress state.

use crate::state::OutcomeCategory;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Sent by workers to the reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A terminal outcome was recorded for one target
    Finished {
        category: OutcomeCategory,
        rows: usize,
    },
    /// A worker left its loop
    WorkerDone { worker: usize },
}

/// Counters owned by the reporter, returned when the channel closes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTotals {
    pub finished: u64,
    pub records: u64,
    pub workers_done: usize,
    pub counts: BTreeMap<OutcomeCategory, u64>,
}

pub struct ProgressReporter {
    total: u64,
    every: u64,
    started: Instant,
    totals: ProgressTotals,
}

impl ProgressReporter {
    /// # Arguments
    ///
    /// * `total` - Targets in the sweep range
    /// * `every` - Log a line each time this many more targets have finished
    pub fn new(total: u64, every: u64) -> Self {
        Self {
            total,
            every: every.max(1),
            started: Instant::now(),
            totals: ProgressTotals::default(),
        }
    }

    /// Consumes events until every sender is dropped, then logs a final line
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProgressEvent>) -> ProgressTotals {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        self.log_line();
        self.totals
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Finished { category, rows } => {
                self.totals.finished += 1;
                self.totals.records += rows as u64;
                *self.totals.counts.entry(category).or_insert(0) += 1;
                if self.totals.finished % self.every == 0 {
                    self.log_line();
                }
            }
            ProgressEvent::WorkerDone { worker } => {
                self.totals.workers_done += 1;
                tracing::debug!(worker, done = self.totals.workers_done, "Worker finished");
            }
        }
    }

    fn rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.totals.finished as f64 / elapsed
        } else {
            0.0
        }
    }

    fn log_line(&self) {
        tracing::info!(
            "Progress: {}/{} targets, {} records, {:.1} ids/sec",
            self.totals.finished,
            self.total,
            self.totals.records,
            self.rate()
        );
    }
}
