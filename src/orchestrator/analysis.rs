//! Drives regression detection and hotspot ranking across every enabled
//! instance/database pair, plus the separate auto-resolution sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::Config;
use crate::domain::baseline::{BaselineEngine, HistoricalDataPoint};
use crate::domain::hotspot::{HotspotCandidate, HotspotDetector, HotspotRules};
use crate::domain::regression::{CurrentAggregate, RegressionDetector, RegressionRules, RegressionStatus};
use crate::error::MonitorError;
use crate::store::MetricsStore;

#[derive(Debug, Default)]
pub struct DatabaseAnalysisResult {
    pub instance: String,
    pub database: String,
    pub fingerprints_evaluated: usize,
    pub regressions_detected: usize,
    pub hotspots_detected: usize,
}

#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub results: Vec<DatabaseAnalysisResult>,
    pub errors: Vec<(String, MonitorError)>,
}

pub struct AnalysisOrchestrator {
    store: Arc<dyn MetricsStore>,
    detector: RegressionDetector,
    hotspot_detector: HotspotDetector,
}

impl AnalysisOrchestrator {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store, detector: RegressionDetector::new(), hotspot_detector: HotspotDetector::new() }
    }

    /// Rebuilds baselines for every fingerprint of one database from the
    /// trailing `lookback` window, superseding whatever was previously active.
    pub async fn rebuild_baselines(
        &self,
        instance: &str,
        database: &str,
        lookback: chrono::Duration,
        engine: &BaselineEngine,
    ) -> Result<usize, MonitorError> {
        let now = Utc::now();
        let window_start = now - lookback;
        let fingerprints = self.store.list_fingerprints(instance, database).await?;
        let mut rebuilt = 0;

        for fp in &fingerprints {
            let samples = self.store.get_samples_for_fingerprint(fp.id, window_start, now).await?;
            let points: Vec<HistoricalDataPoint> = samples
                .iter()
                .map(|s| HistoricalDataPoint {
                    duration_us: s.avg_duration_us,
                    cpu_us: s.avg_cpu_us,
                    logical_reads: s.total_logical_reads as f64,
                    execution_count: s.execution_count,
                })
                .collect();

            let Some(baseline) = engine.compute(fp.id, instance, database, &points, window_start, now, now) else {
                continue;
            };

            self.store.supersede_active_baseline(fp.id).await?;
            self.store.save_baseline(baseline).await?;
            rebuilt += 1;
        }
        Ok(rebuilt)
    }

    pub async fn run_cycle(&self, config: &Config) -> AnalysisOutcome {
        let mut outcome = AnalysisOutcome::default();
        let analysis = &config.analysis;
        let regression_rules = to_regression_rules(&analysis.regression_rules);
        let hotspot_rules = to_hotspot_rules(&analysis.hotspot_rules);

        for instance in config.instances.iter().filter(|i| i.enabled) {
            for database in &instance.databases {
                match self
                    .analyze_one_database(&instance.name, database, analysis, &regression_rules, &hotspot_rules)
                    .await
                {
                    Ok(result) => outcome.results.push(result),
                    Err(e) => {
                        tracing::error!("analysis failed for {}/{}: {}", instance.name, database, e);
                        outcome.errors.push((format!("{}/{}", instance.name, database), e));
                    }
                }
            }
        }
        outcome
    }

    async fn analyze_one_database(
        &self,
        instance: &str,
        database: &str,
        analysis: &crate::config::AnalysisConfig,
        regression_rules: &RegressionRules,
        hotspot_rules: &HotspotRules,
    ) -> Result<DatabaseAnalysisResult, MonitorError> {
        let now = Utc::now();
        let recent_window_start = now - Duration::seconds(analysis.recent_window as i64);
        let hotspot_window_start = now - Duration::seconds(analysis.hotspot_window as i64);

        let fingerprints = self.store.list_fingerprints(instance, database).await?;
        let mut result = DatabaseAnalysisResult {
            instance: instance.to_string(),
            database: database.to_string(),
            fingerprints_evaluated: fingerprints.len(),
            ..Default::default()
        };

        for fp in &fingerprints {
            let Some(baseline) = self.store.get_active_baseline(fp.id).await? else {
                continue;
            };
            let Some(aggregated) = self.store.aggregate(fp.id, recent_window_start, now).await? else {
                continue;
            };

            let current = CurrentAggregate {
                total_executions: aggregated.total_executions,
                p95_duration_us: aggregated.p95_duration_us,
                p95_cpu_us: aggregated.p95_cpu_us,
                avg_logical_reads: aggregated.avg_logical_reads,
                plan_hash: baseline.expected_plan_hash,
            };

            let Some(event) = self.detector.detect(
                fp.id,
                instance,
                database,
                &baseline,
                &current,
                regression_rules,
                recent_window_start,
                now,
            ) else {
                continue;
            };

            if self.store.get_active_regression(fp.id).await?.is_some() {
                continue;
            }

            self.store.save_regression(event).await?;
            result.regressions_detected += 1;
        }

        let latest_samples = self
            .store
            .latest_per_fingerprint(instance, database, hotspot_window_start, now, hotspot_rules.top_n.max(1) * 4)
            .await?;

        let mut candidates = Vec::with_capacity(latest_samples.len());
        for sample in &latest_samples {
            let has_active_regression = self.store.get_active_regression(sample.fingerprint_id).await?.is_some();
            candidates.push(HotspotCandidate {
                fingerprint_id: sample.fingerprint_id,
                instance: instance.to_string(),
                database: database.to_string(),
                total_cpu_ms: sample.total_cpu_us as f64 / 1000.0,
                total_duration_ms: sample.total_duration_us as f64 / 1000.0,
                total_logical_reads: sample.total_logical_reads as f64,
                avg_duration_ms: sample.avg_duration_us / 1000.0,
                execution_count: sample.execution_count,
                has_active_regression,
            });
        }

        let hotspots = self.hotspot_detector.detect(&candidates, hotspot_rules, hotspot_window_start, now);
        result.hotspots_detected = hotspots.len();

        Ok(result)
    }

    /// Rebuilds baselines across every enabled instance/database, used by the
    /// daily baseline-rebuild job.
    pub async fn rebuild_all(&self, config: &Config) -> AnalysisOutcome {
        let mut outcome = AnalysisOutcome::default();
        let lookback = chrono::Duration::days(config.analysis.baseline_lookback_days as i64);
        let engine = BaselineEngine::new(config.analysis.minimum_baseline_samples);

        for instance in config.instances.iter().filter(|i| i.enabled) {
            for database in &instance.databases {
                match self.rebuild_baselines(&instance.name, database, lookback, &engine).await {
                    Ok(rebuilt) => {
                        outcome.results.push(DatabaseAnalysisResult {
                            instance: instance.name.clone(),
                            database: database.clone(),
                            fingerprints_evaluated: rebuilt,
                            ..Default::default()
                        });
                    }
                    Err(e) => {
                        tracing::error!("baseline rebuild failed for {}/{}: {}", instance.name, database, e);
                        outcome.errors.push((format!("{}/{}", instance.name, database), e));
                    }
                }
            }
        }
        outcome
    }

    /// Collects the top hotspots across every enabled instance/database pair,
    /// re-ranked together, for use in the daily summary.
    pub async fn top_hotspots(
        &self,
        config: &Config,
        limit: usize,
    ) -> Result<Vec<crate::domain::hotspot::Hotspot>, MonitorError> {
        let now = Utc::now();
        let hotspot_rules = to_hotspot_rules(&config.analysis.hotspot_rules);
        let window_start = now - Duration::seconds(config.analysis.hotspot_window as i64);

        let mut candidates = Vec::new();
        for instance in config.instances.iter().filter(|i| i.enabled) {
            for database in &instance.databases {
                let latest_samples = self
                    .store
                    .latest_per_fingerprint(&instance.name, database, window_start, now, hotspot_rules.top_n.max(1) * 4)
                    .await?;
                for sample in &latest_samples {
                    let has_active_regression =
                        self.store.get_active_regression(sample.fingerprint_id).await?.is_some();
                    candidates.push(HotspotCandidate {
                        fingerprint_id: sample.fingerprint_id,
                        instance: instance.name.clone(),
                        database: database.clone(),
                        total_cpu_ms: sample.total_cpu_us as f64 / 1000.0,
                        total_duration_ms: sample.total_duration_us as f64 / 1000.0,
                        total_logical_reads: sample.total_logical_reads as f64,
                        avg_duration_ms: sample.avg_duration_us / 1000.0,
                        execution_count: sample.execution_count,
                        has_active_regression,
                    });
                }
            }
        }

        let mut rules = hotspot_rules;
        rules.top_n = limit;
        Ok(self.hotspot_detector.detect(&candidates, &rules, window_start, now))
    }

    /// Scans active regressions and auto-resolves the ones whose current P95
    /// duration has returned within `auto_resolution_tolerance_percent` of baseline.
    pub async fn check_auto_resolutions(&self, analysis: &crate::config::AnalysisConfig) -> Result<usize, MonitorError> {
        let now = Utc::now();
        let recent_window_start = now - Duration::seconds(analysis.recent_window as i64);
        let active = self.store.get_active_regressions().await?;
        let mut resolved = 0;

        for event in active {
            let Some(baseline) = self.store.get_active_baseline(event.fingerprint_id).await? else {
                continue;
            };
            let Some(aggregated) = self.store.aggregate(event.fingerprint_id, recent_window_start, now).await? else {
                continue;
            };
            if baseline.p95_duration_us <= 0.0 {
                continue;
            }
            let deviation_percent =
                (aggregated.p95_duration_us - baseline.p95_duration_us).abs() / baseline.p95_duration_us * 100.0;
            if deviation_percent <= analysis.auto_resolution_tolerance_percent {
                self.store.update_regression_status(event.id, RegressionStatus::AutoResolved).await?;
                resolved += 1;
            }
        }
        Ok(resolved)
    }
}

fn to_regression_rules(config: &crate::config::RegressionRulesConfig) -> RegressionRules {
    RegressionRules {
        minimum_baseline_samples: config.minimum_baseline_samples,
        minimum_executions: config.minimum_executions,
        duration_increase_threshold_percent: config.duration_increase_threshold_percent,
        cpu_increase_threshold_percent: config.cpu_increase_threshold_percent,
        logical_reads_increase_threshold_percent: config.logical_reads_increase_threshold_percent,
        require_multiple_metrics: config.require_multiple_metrics,
    }
}

fn to_hotspot_rules(config: &crate::config::HotspotRulesConfig) -> HotspotRules {
    HotspotRules {
        ranking_metric: config.ranking_metric.into(),
        top_n: config.top_n,
        min_total_cpu_ms: config.min_total_cpu_ms,
        min_total_duration_ms: config.min_total_duration_ms,
        min_execution_count: config.min_execution_count,
        min_avg_duration_ms: config.min_avg_duration_ms,
        include_queries_with_regressions: config.include_queries_with_regressions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::baseline::Baseline;
    use crate::store::InMemoryMetricsStore;
    use uuid::Uuid;

    async fn seed_fingerprint(store: &Arc<InMemoryMetricsStore>, instance: &str, database: &str) -> Uuid {
        store
            .get_or_create_fingerprint([9; 8], "SELECT 1", "SELECT #", instance, database, false, Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn skips_fingerprints_with_no_active_baseline() {
        let store = InMemoryMetricsStore::new();
        seed_fingerprint(&store, "inst", "db").await;
        let orchestrator = AnalysisOrchestrator::new(store.clone());
        let mut config = Config::default();
        config.instances = vec![crate::config::InstanceConfig {
            name: "inst".into(),
            connection_string: "x".into(),
            databases: vec!["db".into()],
            is_production: false,
            enabled: true,
        }];
        let outcome = orchestrator.run_cycle(&config).await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].regressions_detected, 0);
    }

    #[tokio::test]
    async fn auto_resolves_when_back_within_tolerance() {
        let store = InMemoryMetricsStore::new();
        let fp_id = seed_fingerprint(&store, "inst", "db").await;
        let now = Utc::now();
        store
            .save_baseline(Baseline {
                fingerprint_id: fp_id,
                instance: "inst".into(),
                database: "db".into(),
                computed_at_utc: now,
                window_start_utc: now,
                window_end_utc: now,
                sample_count: 20,
                total_executions: 1000,
                median_duration_us: 500.0,
                p95_duration_us: 1000.0,
                p99_duration_us: 1200.0,
                avg_duration_us: 500.0,
                std_dev_duration_us: 10.0,
                avg_cpu_us: 500.0,
                p95_cpu_us: 1000.0,
                avg_logical_reads: 100.0,
                max_logical_reads: 200.0,
                expected_plan_hash: None,
                is_active: true,
            })
            .await
            .unwrap();

        let event = crate::domain::regression::RegressionEvent {
            id: Uuid::new_v4(),
            fingerprint_id: fp_id,
            instance: "inst".into(),
            database: "db".into(),
            detected_at_utc: now,
            event_type: crate::domain::regression::RegressionType::MetricOnly,
            metric: crate::domain::regression::RegressionMetric::P95Duration,
            baseline_value: 1000.0,
            current_value: 2000.0,
            change_percent: 100.0,
            threshold_percent: 50.0,
            severity: crate::domain::regression::Severity::Medium,
            old_plan_hash: None,
            new_plan_hash: None,
            status: RegressionStatus::New,
            description: "test".into(),
        };
        store.save_regression(event).await.unwrap();

        let sample = crate::domain::delta::MetricSample {
            fingerprint_id: fp_id,
            instance: "inst".into(),
            database: "db".into(),
            sampled_at_utc: now,
            plan_hash: None,
            execution_count: 10,
            total_cpu_us: 10_000,
            avg_cpu_us: 1000.0,
            total_duration_us: 10_500,
            avg_duration_us: 1050.0,
            total_logical_reads: 100,
            total_logical_writes: 0,
            total_physical_reads: 0,
            was_reset: false,
        };
        store.save_samples(&[sample]).await.unwrap();

        let orchestrator = AnalysisOrchestrator::new(store.clone());
        let analysis_config = crate::config::AnalysisConfig::default();
        let resolved = orchestrator.check_auto_resolutions(&analysis_config).await.unwrap();
        assert_eq!(resolved, 1);
        assert!(store.get_active_regressions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rebuild_baselines_marks_one_active_baseline() {
        let store = InMemoryMetricsStore::new();
        let fp_id = seed_fingerprint(&store, "inst", "db").await;
        let now = Utc::now();
        let samples: Vec<_> = (0..15)
            .map(|i| crate::domain::delta::MetricSample {
                fingerprint_id: fp_id,
                instance: "inst".into(),
                database: "db".into(),
                sampled_at_utc: now,
                plan_hash: None,
                execution_count: 1,
                total_cpu_us: 100,
                avg_cpu_us: 100.0 + i as f64,
                total_duration_us: 1000,
                avg_duration_us: 1000.0 + i as f64,
                total_logical_reads: 10,
                total_logical_writes: 0,
                total_physical_reads: 0,
                was_reset: false,
            })
            .collect();
        store.save_samples(&samples).await.unwrap();

        let orchestrator = AnalysisOrchestrator::new(store.clone());
        let engine = BaselineEngine::new(10);
        let rebuilt = orchestrator
            .rebuild_baselines("inst", "db", chrono::Duration::days(7), &engine)
            .await
            .unwrap();
        assert_eq!(rebuilt, 1);
        let active = store.get_active_baseline(fp_id).await.unwrap().unwrap();
        assert!(active.is_active);
        assert_eq!(active.sample_count, 15);
    }
}
