//! End-of-run output: summary table, JSON export and threshold verdict.

use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::aggregator::RunSummary;
use crate::percentiles::PercentileStats;
use crate::scheduler::RunReport;
use crate::utils::format_duration;

/// Process exit code for a run that finished within thresholds.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code for runtime failures other than thresholds.
pub const EXIT_RUNTIME_FAILURE: i32 = 1;

/// Process exit code when the run file or overrides are invalid.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Process exit code when the run breached its error-rate threshold.
pub const EXIT_THRESHOLD_EXCEEDED: i32 = 99;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pass/fail decision against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verdict {
    /// No threshold configured
    NoThreshold,

    Pass { error_rate: f64, max_error_rate: f64 },

    ErrorRateExceeded { error_rate: f64, max_error_rate: f64 },
}

impl Verdict {
    /// Compares the run's error rate against `max_error_rate`. The limit is
    /// inclusive: a rate equal to it passes.
    pub fn evaluate(summary: &RunSummary, max_error_rate: Option<f64>) -> Self {
        match max_error_rate {
            None => Verdict::NoThreshold,
            Some(max) if summary.error_rate > max => Verdict::ErrorRateExceeded {
                error_rate: summary.error_rate,
                max_error_rate: max,
            },
            Some(max) => Verdict::Pass {
                error_rate: summary.error_rate,
                max_error_rate: max,
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::ErrorRateExceeded { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_failure() {
            EXIT_THRESHOLD_EXCEEDED
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Renders the human-readable end-of-run summary.
pub fn format_report(report: &RunReport, verdict: &Verdict) -> String {
    let summary = &report.summary;
    let mut out = String::new();

    out.push_str("\n=== Run Summary ===\n\n");
    out.push_str(&format!("  Stop reason:     {}\n", report.stop_reason));
    out.push_str(&format!(
        "  Elapsed:         {}\n",
        format_duration(std::time::Duration::from_secs(report.elapsed.as_secs()))
    ));
    out.push_str(&format!("  Peak users:      {}\n", report.peak_users));
    out.push_str(&format!(
        "  User exits:      {} graceful, {} aborted\n",
        report.drain.graceful, report.drain.aborted
    ));
    out.push_str(&format!("  Requests:        {}\n", summary.total_requests));
    let success_pct = if summary.total_requests > 0 {
        summary.successful_requests as f64 / summary.total_requests as f64 * 100.0
    } else {
        0.0
    };
    out.push_str(&format!(
        "  Successes:       {} ({:.2}%)\n",
        summary.successful_requests, success_pct
    ));
    out.push_str(&format!(
        "  Errors:          {} ({:.2}%)\n",
        summary.failed_requests,
        summary.error_rate * 100.0
    ));
    out.push_str(&format!("  Throughput:      {:.2} req/s\n", summary.throughput_rps));

    out.push_str("\n--- Latency ---\n");
    match &summary.latency {
        Some(stats) => {
            out.push_str(&PercentileStats::table_header());
            out.push('\n');
            out.push_str(&"-".repeat(86));
            out.push('\n');
            out.push_str(&stats.format_table_row("requests"));
            out.push('\n');
        }
        None => out.push_str("No latency samples recorded.\n"),
    }

    if !summary.status_codes.is_empty() {
        out.push_str("\n--- Status Codes ---\n");
        for (code, count) in &summary.status_codes {
            out.push_str(&format!("  {:<6} {:>10}\n", code, count));
        }
    }

    if !summary.errors_by_category.is_empty() {
        out.push_str("\n--- Errors By Category ---\n");
        for (category, count) in &summary.errors_by_category {
            out.push_str(&format!("  {:<20} {:>10}\n", category, count));
        }
    }

    match verdict {
        Verdict::NoThreshold => {}
        Verdict::Pass {
            error_rate,
            max_error_rate,
        } => out.push_str(&format!(
            "\nThreshold passed: error rate {:.2}% <= {:.2}%\n",
            error_rate * 100.0,
            max_error_rate * 100.0
        )),
        Verdict::ErrorRateExceeded {
            error_rate,
            max_error_rate,
        } => out.push_str(&format!(
            "\nThreshold FAILED: error rate {:.2}% > {:.2}%\n",
            error_rate * 100.0,
            max_error_rate * 100.0
        )),
    }

    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    verdict: &'a Verdict,
}

/// Serializes the report and verdict as pretty JSON.
pub fn to_json(report: &RunReport, verdict: &Verdict) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(&JsonReport { report, verdict })?)
}

/// Writes the JSON report to `path`.
pub fn write_json<P: AsRef<Path>>(
    path: P,
    report: &RunReport,
    verdict: &Verdict,
) -> Result<(), ReportError> {
    fs::write(path, to_json(report, verdict)?)?;
    Ok(())
}
