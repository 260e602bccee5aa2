//! Pure ranking of "currently expensive" fingerprints within a window,
//! independent of any baseline.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingMetric {
    TotalCpuTime,
    TotalDuration,
    TotalLogicalReads,
    AvgDuration,
    ExecutionCount,
}

#[derive(Debug, Clone, Copy)]
pub struct HotspotRules {
    pub ranking_metric: RankingMetric,
    pub top_n: usize,
    pub min_total_cpu_ms: f64,
    pub min_total_duration_ms: f64,
    pub min_execution_count: u64,
    pub min_avg_duration_ms: f64,
    pub include_queries_with_regressions: bool,
}

impl Default for HotspotRules {
    fn default() -> Self {
        Self {
            ranking_metric: RankingMetric::TotalCpuTime,
            top_n: 20,
            min_total_cpu_ms: 0.0,
            min_total_duration_ms: 0.0,
            min_execution_count: 0,
            min_avg_duration_ms: 0.0,
            include_queries_with_regressions: true,
        }
    }
}

/// Input candidate: one aggregate per fingerprint within a window.
#[derive(Debug, Clone)]
pub struct HotspotCandidate {
    pub fingerprint_id: Uuid,
    pub instance: String,
    pub database: String,
    pub total_cpu_ms: f64,
    pub total_duration_ms: f64,
    pub total_logical_reads: f64,
    pub avg_duration_ms: f64,
    pub execution_count: u64,
    pub has_active_regression: bool,
}

#[derive(Debug, Clone)]
pub struct Hotspot {
    pub fingerprint_id: Uuid,
    pub instance: String,
    pub database: String,
    pub rank: usize,
    pub ranking_metric: RankingMetric,
    pub ranking_value: f64,
    pub total_cpu_ms: f64,
    pub total_duration_ms: f64,
    pub total_logical_reads: f64,
    pub avg_duration_ms: f64,
    pub execution_count: u64,
    pub percent_of_total: f64,
    pub has_active_regression: bool,
    pub window_start_utc: DateTime<Utc>,
    pub window_end_utc: DateTime<Utc>,
}

fn ranking_value(c: &HotspotCandidate, metric: RankingMetric) -> f64 {
    match metric {
        RankingMetric::TotalCpuTime => c.total_cpu_ms,
        RankingMetric::TotalDuration => c.total_duration_ms,
        RankingMetric::TotalLogicalReads => c.total_logical_reads,
        RankingMetric::AvgDuration => c.avg_duration_ms,
        RankingMetric::ExecutionCount => c.execution_count as f64,
    }
}

#[derive(Default, Clone, Copy)]
pub struct HotspotDetector;

impl HotspotDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        candidates: &[HotspotCandidate],
        rules: &HotspotRules,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<Hotspot> {
        let mut survivors: Vec<&HotspotCandidate> = candidates
            .iter()
            .filter(|c| {
                c.total_cpu_ms >= rules.min_total_cpu_ms
                    && c.total_duration_ms >= rules.min_total_duration_ms
                    && c.execution_count >= rules.min_execution_count
                    && c.avg_duration_ms >= rules.min_avg_duration_ms
            })
            .filter(|c| rules.include_queries_with_regressions || !c.has_active_regression)
            .collect();

        survivors.sort_by(|a, b| {
            ranking_value(b, rules.ranking_metric)
                .partial_cmp(&ranking_value(a, rules.ranking_metric))
                .unwrap()
        });
        survivors.truncate(rules.top_n);

        let total: f64 = survivors.iter().map(|c| ranking_value(c, rules.ranking_metric)).sum();

        survivors
            .into_iter()
            .enumerate()
            .map(|(idx, c)| {
                let value = ranking_value(c, rules.ranking_metric);
                let percent_of_total = if total > 0.0 { 100.0 * value / total } else { 0.0 };
                Hotspot {
                    fingerprint_id: c.fingerprint_id,
                    instance: c.instance.clone(),
                    database: c.database.clone(),
                    rank: idx + 1,
                    ranking_metric: rules.ranking_metric,
                    ranking_value: value,
                    total_cpu_ms: c.total_cpu_ms,
                    total_duration_ms: c.total_duration_ms,
                    total_logical_reads: c.total_logical_reads,
                    avg_duration_ms: c.avg_duration_ms,
                    execution_count: c.execution_count,
                    percent_of_total,
                    has_active_regression: c.has_active_regression,
                    window_start_utc: window_start,
                    window_end_utc: window_end,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(cpu_ms: f64) -> HotspotCandidate {
        HotspotCandidate {
            fingerprint_id: Uuid::new_v4(),
            instance: "inst".into(),
            database: "db".into(),
            total_cpu_ms: cpu_ms,
            total_duration_ms: cpu_ms,
            total_logical_reads: 0.0,
            avg_duration_ms: 10.0,
            execution_count: 10,
            has_active_regression: false,
        }
    }

    #[test]
    fn s6_hotspot_ranking() {
        let detector = HotspotDetector::new();
        let candidates = vec![candidate(5000.0), candidate(10000.0), candidate(2000.0)];
        let rules = HotspotRules { top_n: 3, ..Default::default() };
        let now = Utc::now();
        let hotspots = detector.detect(&candidates, &rules, now, now);
        assert_eq!(hotspots.len(), 3);
        assert_eq!(hotspots[0].ranking_value, 10000.0);
        assert_eq!(hotspots[0].rank, 1);
        assert_eq!(hotspots[1].ranking_value, 5000.0);
        assert_eq!(hotspots[2].ranking_value, 2000.0);
        assert!((hotspots[0].percent_of_total - 58.82).abs() < 0.01);
        assert!((hotspots[1].percent_of_total - 29.41).abs() < 0.01);
        assert!((hotspots[2].percent_of_total - 11.76).abs() < 0.01);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let detector = HotspotDetector::new();
        let hotspots = detector.detect(&[], &HotspotRules::default(), Utc::now(), Utc::now());
        assert!(hotspots.is_empty());
    }

    #[test]
    fn excludes_active_regressions_when_configured() {
        let detector = HotspotDetector::new();
        let mut c = candidate(5000.0);
        c.has_active_regression = true;
        let rules = HotspotRules { include_queries_with_regressions: false, ..Default::default() };
        let hotspots = detector.detect(&[c], &rules, Utc::now(), Utc::now());
        assert!(hotspots.is_empty());
    }

    #[test]
    fn respects_top_n_truncation() {
        let detector = HotspotDetector::new();
        let candidates: Vec<_> = (0..50).map(|i| candidate(i as f64)).collect();
        let rules = HotspotRules { top_n: 5, ..Default::default() };
        let hotspots = detector.detect(&candidates, &rules, Utc::now(), Utc::now());
        assert_eq!(hotspots.len(), 5);
    }
}
