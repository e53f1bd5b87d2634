//! Run-wide metrics aggregation.
//!
//! Virtual users call [`MetricsAggregator::record`] concurrently. Counters are
//! atomics; the latency histogram, status breakdown and observation window
//! share one mutex whose critical section is a handful of map/histogram
//! updates.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::ErrorCategory;
use crate::invoker::{InvocationResult, Outcome};
use crate::metrics::{
    status_code_label, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY,
    REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::percentiles::{LatencyHistogram, PercentileStats};

/// Aggregate statistics for a run (or the run so far).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,

    /// failed / total, 0.0 when nothing was recorded
    pub error_rate: f64,

    /// Failures keyed by category label
    pub errors_by_category: BTreeMap<String, u64>,

    /// Responses keyed by HTTP status, including non-2xx ones
    pub status_codes: BTreeMap<u16, u64>,

    /// Latency distribution in microseconds
    pub latency: Option<PercentileStats>,

    /// Unix milliseconds of the first and last recorded request
    pub first_request_at_ms: Option<u64>,
    pub last_request_at_ms: Option<u64>,

    /// Requests per second over the observed window
    pub throughput_rps: f64,
}

impl RunSummary {
    /// Span between the first and last recorded request.
    pub fn observed_window(&self) -> Duration {
        match (self.first_request_at_ms, self.last_request_at_ms) {
            (Some(first), Some(last)) => Duration::from_millis(last.saturating_sub(first)),
            _ => Duration::ZERO,
        }
    }

    /// One-line progress string for periodic logging.
    pub fn format_progress(&self) -> String {
        let latency = match &self.latency {
            Some(stats) => format!(
                "p50={:.2}ms p90={:.2}ms p99={:.2}ms",
                stats.p50 as f64 / 1000.0,
                stats.p90 as f64 / 1000.0,
                stats.p99 as f64 / 1000.0
            ),
            None => "no latency samples".to_string(),
        };
        format!(
            "requests={} errors={} ({:.2}%) {}",
            self.total_requests,
            self.failed_requests,
            self.error_rate * 100.0,
            latency
        )
    }
}

#[derive(Debug, Default)]
struct Window {
    latency: LatencyHistogram,
    status_codes: BTreeMap<u16, u64>,
    first: Option<SystemTime>,
    last: Option<SystemTime>,
}

/// Thread-safe accumulator of [`InvocationResult`]s.
#[derive(Debug)]
pub struct MetricsAggregator {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    by_category: [AtomicU64; ErrorCategory::COUNT],
    window: Mutex<Window>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            by_category: Default::default(),
            window: Mutex::new(Window::default()),
        }
    }

    /// Folds one result into the run totals and the Prometheus collectors.
    pub fn record(&self, result: InvocationResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        REQUEST_TOTAL.inc();
        REQUEST_DURATION_SECONDS.observe(result.latency.as_secs_f64());

        match &result.outcome {
            Outcome::Success { status } => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                REQUEST_STATUS_CODES
                    .with_label_values(&[status_code_label(*status)])
                    .inc();
            }
            Outcome::Failure(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.by_category[err.category.index()].fetch_add(1, Ordering::Relaxed);
                REQUEST_ERRORS_BY_CATEGORY
                    .with_label_values(&[err.category.label()])
                    .inc();
                let status_label = err.status_code.map(status_code_label).unwrap_or("error");
                REQUEST_STATUS_CODES.with_label_values(&[status_label]).inc();
            }
        }

        let status = result.status_code();
        let mut window = self.lock_window();
        window.latency.record(result.latency);
        if let Some(code) = status {
            *window.status_codes.entry(code).or_insert(0) += 1;
        }
        window.first = Some(match window.first {
            Some(first) => first.min(result.timestamp),
            None => result.timestamp,
        });
        window.last = Some(match window.last {
            Some(last) => last.max(result.timestamp),
            None => result.timestamp,
        });
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Snapshot of everything recorded so far. Reading does not mutate.
    pub fn summarize(&self) -> RunSummary {
        let window = self.lock_window();

        let total_requests = self.total.load(Ordering::Relaxed);
        let successful_requests = self.successes.load(Ordering::Relaxed);
        let failed_requests = self.failures.load(Ordering::Relaxed);

        let errors_by_category = ErrorCategory::ALL
            .iter()
            .filter_map(|category| {
                let count = self.by_category[category.index()].load(Ordering::Relaxed);
                (count > 0).then(|| (category.label().to_string(), count))
            })
            .collect();

        let first_request_at_ms = window.first.map(unix_millis);
        let last_request_at_ms = window.last.map(unix_millis);

        let window_secs = match (window.first, window.last) {
            (Some(first), Some(last)) => last
                .duration_since(first)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64(),
            _ => 0.0,
        };

        RunSummary {
            total_requests,
            successful_requests,
            failed_requests,
            error_rate: ratio(failed_requests, total_requests),
            errors_by_category,
            status_codes: window.status_codes.clone(),
            latency: window.latency.stats(),
            first_request_at_ms,
            last_request_at_ms,
            throughput_rps: if window_secs > 0.0 {
                total_requests as f64 / window_secs
            } else {
                0.0
            },
        }
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        // A panic while holding the lock leaves only plain counters behind.
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
