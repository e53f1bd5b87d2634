//! Streaming latency percentiles backed by an HDR histogram.
//!
//! Memory is fixed by the histogram bounds, not by the number of samples,
//! so arbitrarily long runs never buffer raw latencies.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Lowest trackable latency (1μs).
const LOWEST_US: u64 = 1;

/// Highest trackable latency (10 minutes); larger values are clamped.
const HIGHEST_US: u64 = 600_000_000;

/// Percentile statistics for a set of latency measurements.
///
/// All values are in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileStats {
    /// Number of samples
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    /// 50th percentile (median)
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    /// 99.9th percentile
    pub p99_9: u64,
}

impl PercentileStats {
    /// Format statistics as a compact table row.
    pub fn format_table_row(&self, label: &str) -> String {
        format!(
            "{:<14} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            label,
            self.count,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
            self.mean / 1000.0,
            self.max as f64 / 1000.0,
        )
    }

    /// Header matching [`PercentileStats::format_table_row`].
    pub fn table_header() -> String {
        format!(
            "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n{:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "", "Count", "P50", "P90", "P95", "P99", "P99.9", "Mean", "Max",
            "", "", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)"
        )
    }
}

/// Latency histogram.
///
/// Not synchronized on its own; the metrics aggregator guards it together
/// with the rest of its non-atomic state.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Tracks 1μs to 10 minutes with 3 significant digits.
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(LOWEST_US, HIGHEST_US, 3)
            .expect("histogram bounds are valid constants");
        Self { histogram }
    }

    /// Records one sample, clamped to the trackable range.
    pub fn record(&mut self, latency: Duration) {
        let latency_us = latency.as_micros().min(u64::MAX as u128) as u64;
        let clamped = latency_us.clamp(LOWEST_US, HIGHEST_US);

        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    /// Returns `None` if no samples have been recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = &self.histogram;

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_basic() {
        let mut hist = LatencyHistogram::new();

        for i in 1..=10 {
            hist.record(Duration::from_millis(i * 10));
        }

        let stats = hist.stats().expect("Should have stats");

        assert_eq!(stats.count, 10);
        assert!(
            stats.min >= 9_900 && stats.min <= 10_100,
            "min {}μs should be around 10000μs",
            stats.min
        );
        assert!(
            stats.max >= 99_900 && stats.max <= 100_500,
            "max {}μs should be around 100000μs",
            stats.max
        );
        assert!(
            stats.p50 >= 45_000 && stats.p50 <= 55_000,
            "P50 {}μs should be around 50000μs",
            stats.p50
        );
        assert!(
            stats.p90 >= 85_000 && stats.p90 <= 95_000,
            "P90 {}μs should be around 90000μs",
            stats.p90
        );
    }

    #[test]
    fn empty_histogram_has_no_stats() {
        assert!(LatencyHistogram::new().stats().is_none());
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::ZERO);
        hist.record(Duration::from_secs(3600));

        let stats = hist.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.min >= 1);
        assert!(stats.max <= HIGHEST_US + HIGHEST_US / 1000);
    }

    #[test]
    fn table_row_lines_up_with_header() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_millis(12));
        let stats = hist.stats().unwrap();

        let row = stats.format_table_row("latency");
        assert!(row.starts_with("latency"));
        assert!(row.contains("12.0"), "row was: {}", row);
        assert!(PercentileStats::table_header().contains("P99.9"));
    }
}
