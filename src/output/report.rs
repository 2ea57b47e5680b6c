//! Final sweep report
//!
//! Assembled by the coordinator from the registry snapshot and the publisher
//! summary once the sweep has drained.

use crate::output::publisher::PublishSummary;
use crate::state::{OutcomeCategory, RegistrySnapshot, SweepState};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Everything known about a finished sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub sweep_id: String,
    pub state: SweepState,
    pub abort_reason: Option<String>,
    pub range: (u64, u64),
    pub extractor: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,

    /// Terminal outcomes per category
    pub counts: BTreeMap<OutcomeCategory, u64>,
    /// Up to K sample targets per non-record category
    pub samples: BTreeMap<OutcomeCategory, Vec<u64>>,
    /// Retries per target, for targets that needed any
    pub retries: BTreeMap<u64, u32>,

    pub records_emitted: u64,
    pub rows_published: u64,
    pub batches_published: u64,
    pub publish_attempts: u64,
    pub rows_spilled: u64,
    pub rows_lost: u64,
    pub spill_files: Vec<PathBuf>,
    /// Non-empty values seen per field
    pub field_totals: BTreeMap<String, u64>,

    /// Highest number of simultaneous HTTP requests observed
    pub peak_in_flight: usize,
}

impl SweepReport {
    /// Report with no outcomes yet
    pub fn new(sweep_id: &str, range: (u64, u64), extractor: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            sweep_id: sweep_id.to_string(),
            state: SweepState::Idle,
            abort_reason: None,
            range,
            extractor: extractor.to_string(),
            started_at,
            elapsed: Duration::ZERO,
            counts: BTreeMap::new(),
            samples: BTreeMap::new(),
            retries: BTreeMap::new(),
            records_emitted: 0,
            rows_published: 0,
            batches_published: 0,
            publish_attempts: 0,
            rows_spilled: 0,
            rows_lost: 0,
            spill_files: Vec::new(),
            field_totals: BTreeMap::new(),
            peak_in_flight: 0,
        }
    }

    /// Copies the registry tally into the report
    pub fn absorb_registry(&mut self, snapshot: RegistrySnapshot) {
        self.counts = snapshot.counts;
        self.samples = snapshot.samples;
        self.retries = snapshot.retries;
    }

    /// Copies the publisher summary into the report
    pub fn absorb_publish(&mut self, summary: PublishSummary) {
        self.records_emitted = summary.records_received;
        self.rows_published = summary.rows_published;
        self.batches_published = summary.batches_published;
        self.publish_attempts = summary.publish_attempts;
        self.rows_spilled = summary.rows_spilled;
        self.rows_lost = summary.rows_lost;
        self.spill_files = summary.spill_files;
        self.field_totals = summary.field_totals;
    }

    pub fn count(&self, category: OutcomeCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    /// Targets with a terminal outcome
    pub fn terminal_total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Targets in the configured range
    pub fn range_len(&self) -> u64 {
        self.range.1.saturating_sub(self.range.0).saturating_add(1)
    }

    pub fn retries_for(&self, target: u64) -> u32 {
        self.retries.get(&target).copied().unwrap_or(0)
    }

    pub fn ids_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.terminal_total() as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == SweepState::Aborted
    }

    /// Process exit code for this report: 0 when done, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match self.state {
            SweepState::Done => 0,
            _ => 1,
        }
    }
}

/// Prints the report to stdout
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &SweepReport) {
    println!("=== Sweep Report ===\n");

    println!("Overview:");
    println!("  Sweep ID: {}", report.sweep_id);
    println!("  Extractor: {}", report.extractor);
    println!(
        "  Range: {}..={} ({} targets)",
        report.range.0,
        report.range.1,
        report.range_len()
    );
    println!("  Final state: {}", report.state);
    if let Some(reason) = &report.abort_reason {
        println!("  Abort reason: {}", reason);
    }
    println!(
        "  Elapsed: {:.1}s ({:.1} ids/sec)",
        report.elapsed.as_secs_f64(),
        report.ids_per_second()
    );
    println!("  Peak in-flight requests: {}", report.peak_in_flight);
    println!();

    println!("Outcomes:");
    let total = report.terminal_total();
    for category in OutcomeCategory::all() {
        let count = report.count(category);
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", category.as_str(), count, percentage);
    }
    println!("  Total terminal: {} / {}", total, report.range_len());
    println!();

    let sampled: Vec<_> = report.samples.iter().filter(|(_, s)| !s.is_empty()).collect();
    if !sampled.is_empty() {
        println!("Sample Targets:");
        for (category, targets) in sampled {
            let list: Vec<String> = targets.iter().map(u64::to_string).collect();
            println!("  {}: {}", category.as_str(), list.join(", "));
        }
        println!();
    }

    if !report.retries.is_empty() {
        let total_retries: u64 = report.retries.values().map(|&r| r as u64).sum();
        println!(
            "Retries: {} across {} targets",
            total_retries,
            report.retries.len()
        );
        println!();
    }

    println!("Publishing:");
    println!("  Records emitted: {}", report.records_emitted);
    println!(
        "  Rows published: {} in {} batches ({} attempts)",
        report.rows_published, report.batches_published, report.publish_attempts
    );
    if report.rows_lost > 0 {
        println!("  Rows lost: {}", report.rows_lost);
    }
    if !report.spill_files.is_empty() {
        println!(
            "  Spilled: {} rows in {} files",
            report.rows_spilled,
            report.spill_files.len()
        );
        for path in &report.spill_files {
            println!("    - {}", path.display());
        }
    }
    println!();

    if report.records_emitted > 0 && !report.field_totals.is_empty() {
        println!("Field Totals (non-empty):");
        for (field, count) in &report.field_totals {
            println!("  {}: {}", field, count);
        }
    }
}
