//! Rolling statistical baseline per fingerprint.
//!
//! Adapted from the percentile/stddev aggregation the source system used for
//! per-complexity-bucket performance baselines, generalized here to one
//! baseline per fingerprint rather than per complexity class.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub fingerprint_id: Uuid,
    pub instance: String,
    pub database: String,
    pub computed_at_utc: DateTime<Utc>,
    pub window_start_utc: DateTime<Utc>,
    pub window_end_utc: DateTime<Utc>,
    pub sample_count: usize,
    pub total_executions: u64,
    pub median_duration_us: f64,
    pub p95_duration_us: f64,
    pub p99_duration_us: f64,
    pub avg_duration_us: f64,
    pub std_dev_duration_us: f64,
    pub avg_cpu_us: f64,
    pub p95_cpu_us: f64,
    pub avg_logical_reads: f64,
    pub max_logical_reads: f64,
    pub expected_plan_hash: Option<[u8; 8]>,
    pub is_active: bool,
}

/// One historical data point fed into baseline aggregation. `duration_us`
/// carries per-execution duration, used to derive percentiles.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalDataPoint {
    pub duration_us: f64,
    pub cpu_us: f64,
    pub logical_reads: f64,
    pub execution_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineEngine {
    /// Fewer than this many samples in the lookback window and no baseline
    /// is computed. Spec default 3, production recommendation 10.
    pub minimum_baseline_samples: usize,
}

impl Default for BaselineEngine {
    fn default() -> Self {
        Self { minimum_baseline_samples: 3 }
    }
}

impl BaselineEngine {
    pub fn new(minimum_baseline_samples: usize) -> Self {
        Self { minimum_baseline_samples }
    }

    /// Compute a baseline from a set of historical points already scoped to
    /// one fingerprint and lookback window. Returns `None` when there aren't
    /// enough samples to be statistically meaningful.
    pub fn compute(
        &self,
        fingerprint_id: Uuid,
        instance: &str,
        database: &str,
        points: &[HistoricalDataPoint],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Baseline> {
        if points.len() < self.minimum_baseline_samples {
            return None;
        }

        let mut durations: Vec<f64> = points.iter().map(|p| p.duration_us).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let median = percentile(&durations, 0.50);
        let p95 = percentile(&durations, 0.95);
        let p99 = percentile(&durations, 0.99);
        let avg = mean(&durations);
        let std_dev = std_dev(&durations, avg);

        let cpus: Vec<f64> = points.iter().map(|p| p.cpu_us).collect();
        let avg_cpu = mean(&cpus);
        let p95_cpu = percentile(&{
            let mut v = cpus.clone();
            v.sort_by(|a, b| a.partial_cmp(b).unwrap());
            v
        }, 0.95);

        let reads: Vec<f64> = points.iter().map(|p| p.logical_reads).collect();
        let avg_reads = mean(&reads);
        let max_reads = reads.iter().cloned().fold(0.0, f64::max);

        let total_executions: u64 = points.iter().map(|p| p.execution_count).sum();

        Some(Baseline {
            fingerprint_id,
            instance: instance.to_string(),
            database: database.to_string(),
            computed_at_utc: now,
            window_start_utc: window_start,
            window_end_utc: window_end,
            sample_count: points.len(),
            total_executions,
            median_duration_us: median,
            p95_duration_us: p95,
            p99_duration_us: p99,
            avg_duration_us: avg,
            std_dev_duration_us: std_dev,
            avg_cpu_us: avg_cpu,
            p95_cpu_us: p95_cpu,
            avg_logical_reads: avg_reads,
            max_logical_reads: max_reads,
            expected_plan_hash: None,
            is_active: true,
        })
    }

    pub fn needs_refresh(&self, active: Option<&Baseline>, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        match active {
            None => true,
            Some(b) => now - b.computed_at_utc > max_age,
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(duration: f64) -> HistoricalDataPoint {
        HistoricalDataPoint { duration_us: duration, cpu_us: duration / 2.0, logical_reads: 10.0, execution_count: 1 }
    }

    #[test]
    fn below_minimum_samples_returns_none() {
        let engine = BaselineEngine::new(10);
        let points: Vec<_> = (0..5).map(|i| point(i as f64)).collect();
        let now = Utc::now();
        assert!(engine
            .compute(Uuid::nil(), "inst", "db", &points, now, now, now)
            .is_none());
    }

    #[test]
    fn computes_percentiles_for_enough_samples() {
        let engine = BaselineEngine::new(3);
        let points: Vec<_> = (1..=20).map(|i| point(i as f64 * 100.0)).collect();
        let now = Utc::now();
        let baseline = engine
            .compute(Uuid::nil(), "inst", "db", &points, now, now, now)
            .unwrap();
        assert_eq!(baseline.sample_count, 20);
        assert!(baseline.p95_duration_us >= baseline.median_duration_us);
        assert!(baseline.p99_duration_us >= baseline.p95_duration_us);
        assert!(baseline.is_active);
    }

    #[test]
    fn needs_refresh_when_no_active_baseline() {
        let engine = BaselineEngine::default();
        assert!(engine.needs_refresh(None, chrono::Duration::days(1), Utc::now()));
    }
}
