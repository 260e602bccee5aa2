//! Pure regression detection: baseline + current aggregate -> optional event.
//!
//! Never performs I/O; the orchestrator is responsible for loading the
//! baseline and the current aggregate and for persisting whatever this
//! produces.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::baseline::Baseline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_percent_increase(percent: f64) -> Self {
        if percent >= 500.0 {
            Severity::Critical
        } else if percent >= 200.0 {
            Severity::High
        } else if percent >= 100.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegressionMetric {
    P95Duration,
    P95Cpu,
    AvgLogicalReads,
}

impl RegressionMetric {
    /// Stable tie-break order: duration, then CPU, then reads.
    fn priority(self) -> u8 {
        match self {
            RegressionMetric::P95Duration => 0,
            RegressionMetric::P95Cpu => 1,
            RegressionMetric::AvgLogicalReads => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionType {
    MetricOnly,
    PlanChange,
    PlanChangeWithRegression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionStatus {
    New,
    Acknowledged,
    Resolved,
    AutoResolved,
    Dismissed,
}

#[derive(Debug, Clone)]
pub struct RegressionEvent {
    pub id: Uuid,
    pub fingerprint_id: Uuid,
    pub instance: String,
    pub database: String,
    pub detected_at_utc: DateTime<Utc>,
    pub event_type: RegressionType,
    pub metric: RegressionMetric,
    pub baseline_value: f64,
    pub current_value: f64,
    pub change_percent: f64,
    pub threshold_percent: f64,
    pub severity: Severity,
    pub old_plan_hash: Option<[u8; 8]>,
    pub new_plan_hash: Option<[u8; 8]>,
    pub status: RegressionStatus,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RegressionRules {
    pub minimum_baseline_samples: usize,
    pub minimum_executions: u64,
    pub duration_increase_threshold_percent: f64,
    pub cpu_increase_threshold_percent: f64,
    pub logical_reads_increase_threshold_percent: f64,
    pub require_multiple_metrics: bool,
}

impl Default for RegressionRules {
    fn default() -> Self {
        Self {
            minimum_baseline_samples: 10,
            minimum_executions: 5,
            duration_increase_threshold_percent: 50.0,
            cpu_increase_threshold_percent: 50.0,
            logical_reads_increase_threshold_percent: 50.0,
            require_multiple_metrics: false,
        }
    }
}

/// Current-period aggregate fed to the detector; produced by the orchestrator
/// from a batch of MetricSamples.
#[derive(Debug, Clone, Copy)]
pub struct CurrentAggregate {
    pub total_executions: u64,
    pub p95_duration_us: f64,
    pub p95_cpu_us: f64,
    pub avg_logical_reads: f64,
    pub plan_hash: Option<[u8; 8]>,
}

#[derive(Default, Clone, Copy)]
pub struct RegressionDetector;

impl RegressionDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        fingerprint_id: Uuid,
        instance: &str,
        database: &str,
        baseline: &Baseline,
        current: &CurrentAggregate,
        rules: &RegressionRules,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<RegressionEvent> {
        if baseline.sample_count < rules.minimum_baseline_samples {
            return None;
        }
        if current.total_executions < rules.minimum_executions {
            return None;
        }

        let candidates = [
            (
                RegressionMetric::P95Duration,
                baseline.p95_duration_us,
                current.p95_duration_us,
                rules.duration_increase_threshold_percent,
            ),
            (
                RegressionMetric::P95Cpu,
                baseline.p95_cpu_us,
                current.p95_cpu_us,
                rules.cpu_increase_threshold_percent,
            ),
            (
                RegressionMetric::AvgLogicalReads,
                baseline.avg_logical_reads,
                current.avg_logical_reads,
                rules.logical_reads_increase_threshold_percent,
            ),
        ];

        let mut regressed: Vec<(RegressionMetric, f64, f64, f64)> = Vec::new();
        for (metric, baseline_value, current_value, threshold) in candidates {
            if baseline_value <= 0.0 {
                continue;
            }
            let percent = (current_value - baseline_value) / baseline_value * 100.0;
            if percent >= threshold {
                regressed.push((metric, baseline_value, current_value, percent));
            }
        }

        let required = if rules.require_multiple_metrics { 2 } else { 1 };
        if regressed.len() < required {
            return None;
        }

        // Pick the metric with the largest percent increase; ties broken by
        // metric priority (duration, cpu, reads).
        regressed.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap()
                .then_with(|| a.0.priority().cmp(&b.0.priority()))
        });
        let (metric, baseline_value, current_value, percent) = regressed[0];
        let severity = Severity::from_percent_increase(percent);

        let event_type = match (baseline.expected_plan_hash, current.plan_hash) {
            (Some(expected), Some(actual)) if expected != actual => {
                RegressionType::PlanChangeWithRegression
            }
            _ => RegressionType::MetricOnly,
        };

        let threshold = match metric {
            RegressionMetric::P95Duration => rules.duration_increase_threshold_percent,
            RegressionMetric::P95Cpu => rules.cpu_increase_threshold_percent,
            RegressionMetric::AvgLogicalReads => rules.logical_reads_increase_threshold_percent,
        };

        Some(RegressionEvent {
            id: Uuid::new_v4(),
            fingerprint_id,
            instance: instance.to_string(),
            database: database.to_string(),
            detected_at_utc: window_end,
            event_type,
            metric,
            baseline_value,
            current_value,
            change_percent: percent,
            threshold_percent: threshold,
            severity,
            old_plan_hash: baseline.expected_plan_hash,
            new_plan_hash: current.plan_hash,
            status: RegressionStatus::New,
            description: format!(
                "{:?} increased {:.1}% vs baseline ({:.1} -> {:.1}) over window {} to {}",
                metric, percent, baseline_value, current_value, window_start, window_end
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn baseline(sample_count: usize, p95: f64) -> Baseline {
        let now = Utc::now();
        Baseline {
            fingerprint_id: Uuid::nil(),
            instance: "inst".into(),
            database: "db".into(),
            computed_at_utc: now,
            window_start_utc: now,
            window_end_utc: now,
            sample_count,
            total_executions: 1000,
            median_duration_us: p95 / 2.0,
            p95_duration_us: p95,
            p99_duration_us: p95 * 1.2,
            avg_duration_us: p95 / 2.0,
            std_dev_duration_us: 10.0,
            avg_cpu_us: p95 / 2.0,
            p95_cpu_us: p95,
            avg_logical_reads: 100.0,
            max_logical_reads: 200.0,
            expected_plan_hash: None,
            is_active: true,
        }
    }

    fn rules() -> RegressionRules {
        RegressionRules {
            minimum_baseline_samples: 10,
            minimum_executions: 5,
            duration_increase_threshold_percent: 50.0,
            cpu_increase_threshold_percent: 50.0,
            logical_reads_increase_threshold_percent: 50.0,
            require_multiple_metrics: false,
        }
    }

    #[test]
    fn s1_simple_duration_regression() {
        let detector = RegressionDetector::new();
        let b = baseline(15, 1000.0);
        let current = CurrentAggregate {
            total_executions: 10,
            p95_duration_us: 2000.0,
            p95_cpu_us: 0.0,
            avg_logical_reads: 0.0,
            plan_hash: None,
        };
        let now = Utc::now();
        let event = detector
            .detect(Uuid::nil(), "inst", "db", &b, &current, &rules(), now, now)
            .unwrap();
        assert_eq!(event.metric, RegressionMetric::P95Duration);
        assert!((event.change_percent - 100.0).abs() < 0.01);
        assert_eq!(event.severity, Severity::Medium);
    }

    #[test]
    fn s2_below_threshold_no_event() {
        let detector = RegressionDetector::new();
        let b = baseline(15, 1000.0);
        let current = CurrentAggregate {
            total_executions: 10,
            p95_duration_us: 1200.0,
            p95_cpu_us: 0.0,
            avg_logical_reads: 0.0,
            plan_hash: None,
        };
        let now = Utc::now();
        assert!(detector
            .detect(Uuid::nil(), "inst", "db", &b, &current, &rules(), now, now)
            .is_none());
    }

    #[test]
    fn s3_severity_ladder() {
        let detector = RegressionDetector::new();
        let b = baseline(15, 1000.0);
        let now = Utc::now();
        let cases = [(1500.0, Severity::Low), (2000.0, Severity::Medium), (3000.0, Severity::High), (6000.0, Severity::Critical)];
        for (p95, expected) in cases {
            let current = CurrentAggregate {
                total_executions: 10,
                p95_duration_us: p95,
                p95_cpu_us: 0.0,
                avg_logical_reads: 0.0,
                plan_hash: None,
            };
            let event = detector
                .detect(Uuid::nil(), "inst", "db", &b, &current, &rules(), now, now)
                .unwrap();
            assert_eq!(event.severity, expected, "p95={p95}");
        }
    }

    #[test]
    fn below_minimum_baseline_samples_skips() {
        let detector = RegressionDetector::new();
        let b = baseline(3, 1000.0);
        let current = CurrentAggregate {
            total_executions: 10,
            p95_duration_us: 5000.0,
            p95_cpu_us: 0.0,
            avg_logical_reads: 0.0,
            plan_hash: None,
        };
        let now = Utc::now();
        assert!(detector
            .detect(Uuid::nil(), "inst", "db", &b, &current, &rules(), now, now)
            .is_none());
    }

    #[test]
    fn monotone_in_current_metric() {
        let detector = RegressionDetector::new();
        let b = baseline(15, 1000.0);
        let now = Utc::now();
        let low = CurrentAggregate { total_executions: 10, p95_duration_us: 1600.0, p95_cpu_us: 0.0, avg_logical_reads: 0.0, plan_hash: None };
        let high = CurrentAggregate { p95_duration_us: 2500.0, ..low };
        let low_event = detector.detect(Uuid::nil(), "inst", "db", &b, &low, &rules(), now, now);
        let high_event = detector.detect(Uuid::nil(), "inst", "db", &b, &high, &rules(), now, now);
        assert!(low_event.is_some());
        assert!(high_event.is_some());
        assert!(high_event.unwrap().change_percent >= low_event.unwrap().change_percent);
    }
}
