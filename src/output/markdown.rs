//! Markdown summary generation
//!
//! This module renders the final sweep report as a markdown document,
//! including outcome counts, sample failures, publishing results and
//! per-field totals.

use crate::output::report::SweepReport;
use crate::state::OutcomeCategory;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown rendering of a report
///
/// # Arguments
///
/// * `report` - The finished sweep report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(io::Error)` - Failed to write summary
pub fn generate_markdown_summary(report: &SweepReport, output_path: &Path) -> std::io::Result<()> {
    let markdown = format_markdown_summary(report);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a sweep report as markdown
pub fn format_markdown_summary(report: &SweepReport) -> String {
    let mut md = String::new();

    md.push_str("# ID Sweep Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Sweep ID**: {}\n", report.sweep_id));
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds ({:.2} minutes)\n",
        report.elapsed.as_secs_f64(),
        report.elapsed.as_secs_f64() / 60.0
    ));
    md.push_str(&format!("- **Status**: {}\n", report.state));
    if let Some(reason) = &report.abort_reason {
        md.push_str(&format!("- **Abort Reason**: {}\n", reason));
    }
    md.push_str(&format!("- **Extractor**: {}\n", report.extractor));
    md.push_str(&format!(
        "- **Range**: {} to {} ({} targets)\n\n",
        report.range.0,
        report.range.1,
        report.range_len()
    ));

    // Outcomes
    md.push_str("## Outcomes\n\n");
    md.push_str("| Category | Count | Sample Targets |\n");
    md.push_str("|----------|-------|----------------|\n");
    for category in OutcomeCategory::all() {
        let samples = report
            .samples
            .get(&category)
            .map(|targets| {
                targets
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            category.as_str(),
            report.count(category),
            samples
        ));
    }
    md.push_str(&format!(
        "\n**Throughput**: {:.1} ids/sec, peak {} requests in flight\n\n",
        report.ids_per_second(),
        report.peak_in_flight
    ));

    if !report.retries.is_empty() {
        md.push_str("## Retried Targets\n\n");
        md.push_str("| Target | Retries |\n");
        md.push_str("|--------|---------|\n");
        for (target, retries) in &report.retries {
            md.push_str(&format!("| {} | {} |\n", target, retries));
        }
        md.push('\n');
    }

    // Publishing
    md.push_str("## Publishing\n\n");
    md.push_str(&format!("- **Records Emitted**: {}\n", report.records_emitted));
    md.push_str(&format!("- **Rows Published**: {}\n", report.rows_published));
    md.push_str(&format!("- **Batches Published**: {}\n", report.batches_published));
    md.push_str(&format!("- **Publish Attempts**: {}\n", report.publish_attempts));
    if report.rows_lost > 0 {
        md.push_str(&format!("- **Rows Lost**: {}\n", report.rows_lost));
    }
    if !report.spill_files.is_empty() {
        md.push_str(&format!("- **Rows Spilled**: {}\n\n", report.rows_spilled));
        md.push_str("### Spill Files\n\n");
        for path in &report.spill_files {
            md.push_str(&format!("- `{}`\n", path.display()));
        }
    }
    md.push('\n');

    if !report.field_totals.is_empty() {
        md.push_str("## Field Totals\n\n");
        md.push_str("| Field | Non-empty |\n");
        md.push_str("|-------|-----------|\n");
        for (field, count) in &report.field_totals {
            md.push_str(&format!("| {} | {} |\n", field, count));
        }
        md.push('\n');
    }

    md
}
