//! The persistence contract the orchestrators depend on.
//!
//! Shipped here with one in-process reference implementation. A production
//! deployment backs the same trait with the real physical schema; that
//! schema is outside this crate's scope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::baseline::Baseline;
use crate::domain::delta::{MetricSample, Snapshot};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::regression::{RegressionEvent, RegressionStatus};
use crate::domain::remediation::RemediationAudit;
use crate::error::MonitorResult;

#[derive(Debug, Clone, Copy)]
pub struct AggregatedMetrics {
    pub total_executions: u64,
    pub p50_duration_us: Option<f64>,
    pub p95_duration_us: f64,
    pub p99_duration_us: f64,
    pub avg_duration_us: f64,
    pub avg_cpu_us: f64,
    pub p95_cpu_us: f64,
    pub avg_logical_reads: f64,
    pub max_logical_reads: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotKey {
    pub fingerprint_id: Uuid,
    pub plan_hash: Option<[u8; 8]>,
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn get_or_create_fingerprint(
        &self,
        hash: [u8; 8],
        sample_text: &str,
        normalized_text: &str,
        instance: &str,
        database: &str,
        is_from_server_hash: bool,
        now: DateTime<Utc>,
    ) -> MonitorResult<Uuid>;

    async fn touch_fingerprint(&self, id: Uuid, now: DateTime<Utc>) -> MonitorResult<()>;

    async fn get_fingerprint(&self, id: Uuid) -> MonitorResult<Option<Fingerprint>>;

    async fn list_fingerprints(&self, instance: &str, database: &str) -> MonitorResult<Vec<Fingerprint>>;

    async fn save_samples(&self, samples: &[MetricSample]) -> MonitorResult<()>;

    async fn get_samples_for_fingerprint(
        &self,
        fingerprint_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricSample>>;

    async fn aggregate(
        &self,
        fingerprint_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> MonitorResult<Option<AggregatedMetrics>>;

    async fn latest_per_fingerprint(
        &self,
        instance: &str,
        database: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        top_n: usize,
    ) -> MonitorResult<Vec<MetricSample>>;

    async fn purge_samples_older_than(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64>;

    async fn get_last_snapshot(
        &self,
        instance: &str,
        database: &str,
        key: SnapshotKey,
    ) -> MonitorResult<Option<Snapshot>>;

    async fn upsert_snapshot(
        &self,
        instance: &str,
        database: &str,
        key: SnapshotKey,
        snapshot: Snapshot,
    ) -> MonitorResult<()>;

    async fn purge_stale_snapshots(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64>;

    async fn get_active_baseline(&self, fingerprint_id: Uuid) -> MonitorResult<Option<Baseline>>;

    async fn supersede_active_baseline(&self, fingerprint_id: Uuid) -> MonitorResult<()>;

    async fn save_baseline(&self, baseline: Baseline) -> MonitorResult<()>;

    async fn save_regression(&self, event: RegressionEvent) -> MonitorResult<()>;

    async fn update_regression_status(&self, id: Uuid, status: RegressionStatus) -> MonitorResult<()>;

    async fn get_active_regression(&self, fingerprint_id: Uuid) -> MonitorResult<Option<RegressionEvent>>;

    async fn get_active_regressions(&self) -> MonitorResult<Vec<RegressionEvent>>;

    async fn get_recent_regressions(&self, window_start: DateTime<Utc>) -> MonitorResult<Vec<RegressionEvent>>;

    async fn purge_regressions_older_than(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64>;

    async fn save_remediation_audit(&self, audit: RemediationAudit) -> MonitorResult<()>;

    async fn recent_remediation_count(
        &self,
        instance: &str,
        since: DateTime<Utc>,
    ) -> MonitorResult<u32>;
}

/// In-memory reference implementation, used both as the runnable default
/// store and as the orchestrators' test double.
#[derive(Default)]
pub struct InMemoryMetricsStore {
    inner: RwLock<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    fingerprints: HashMap<Uuid, Fingerprint>,
    fingerprint_index: HashMap<([u8; 8], String), Uuid>,
    samples: Vec<MetricSample>,
    snapshots: HashMap<(String, String, Uuid, Option<[u8; 8]>), Snapshot>,
    baselines: HashMap<Uuid, Vec<Baseline>>,
    regressions: HashMap<Uuid, RegressionEvent>,
    remediation_audit: Vec<RemediationAudit>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn get_or_create_fingerprint(
        &self,
        hash: [u8; 8],
        sample_text: &str,
        normalized_text: &str,
        instance: &str,
        database: &str,
        is_from_server_hash: bool,
        now: DateTime<Utc>,
    ) -> MonitorResult<Uuid> {
        let mut state = self.inner.write().await;
        let key = (hash, database.to_string());
        if let Some(id) = state.fingerprint_index.get(&key).copied() {
            if let Some(fp) = state.fingerprints.get_mut(&id) {
                fp.touch(now);
            }
            return Ok(id);
        }
        let id = Uuid::new_v4();
        state.fingerprints.insert(
            id,
            Fingerprint {
                id,
                hash,
                sample_text: sample_text.to_string(),
                normalized_text: normalized_text.to_string(),
                instance_name: instance.to_string(),
                database_name: database.to_string(),
                first_seen_utc: now,
                last_seen_utc: now,
                is_from_server_hash,
            },
        );
        state.fingerprint_index.insert(key, id);
        Ok(id)
    }

    async fn touch_fingerprint(&self, id: Uuid, now: DateTime<Utc>) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        if let Some(fp) = state.fingerprints.get_mut(&id) {
            fp.touch(now);
        }
        Ok(())
    }

    async fn get_fingerprint(&self, id: Uuid) -> MonitorResult<Option<Fingerprint>> {
        Ok(self.inner.read().await.fingerprints.get(&id).cloned())
    }

    async fn list_fingerprints(&self, instance: &str, database: &str) -> MonitorResult<Vec<Fingerprint>> {
        let state = self.inner.read().await;
        Ok(state
            .fingerprints
            .values()
            .filter(|fp| fp.instance_name == instance && fp.database_name == database)
            .cloned()
            .collect())
    }

    async fn save_samples(&self, samples: &[MetricSample]) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        state.samples.extend_from_slice(samples);
        Ok(())
    }

    async fn get_samples_for_fingerprint(
        &self,
        fingerprint_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricSample>> {
        let state = self.inner.read().await;
        Ok(state
            .samples
            .iter()
            .filter(|s| {
                s.fingerprint_id == fingerprint_id
                    && s.sampled_at_utc >= window_start
                    && s.sampled_at_utc <= window_end
            })
            .cloned()
            .collect())
    }

    async fn aggregate(
        &self,
        fingerprint_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> MonitorResult<Option<AggregatedMetrics>> {
        let state = self.inner.read().await;
        let in_window: Vec<&MetricSample> = state
            .samples
            .iter()
            .filter(|s| {
                s.fingerprint_id == fingerprint_id
                    && s.sampled_at_utc >= window_start
                    && s.sampled_at_utc <= window_end
            })
            .collect();
        if in_window.is_empty() {
            return Ok(None);
        }
        let mut durations: Vec<f64> = in_window.iter().map(|s| s.avg_duration_us).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut cpus: Vec<f64> = in_window.iter().map(|s| s.avg_cpu_us).collect();
        cpus.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let total_executions: u64 = in_window.iter().map(|s| s.execution_count).sum();
        let avg_duration = mean(&durations);
        let avg_cpu = mean(&cpus);
        let reads: Vec<f64> = in_window.iter().map(|s| s.total_logical_reads as f64).collect();
        Ok(Some(AggregatedMetrics {
            total_executions,
            p50_duration_us: Some(percentile(&durations, 0.5)),
            p95_duration_us: percentile(&durations, 0.95),
            p99_duration_us: percentile(&durations, 0.99),
            avg_duration_us: avg_duration,
            avg_cpu_us: avg_cpu,
            p95_cpu_us: percentile(&cpus, 0.95),
            avg_logical_reads: mean(&reads),
            max_logical_reads: reads.iter().cloned().fold(0.0, f64::max),
        }))
    }

    async fn latest_per_fingerprint(
        &self,
        instance: &str,
        database: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        top_n: usize,
    ) -> MonitorResult<Vec<MetricSample>> {
        let state = self.inner.read().await;
        let mut latest: HashMap<Uuid, &MetricSample> = HashMap::new();
        for s in state.samples.iter().filter(|s| {
            s.instance == instance
                && s.database == database
                && s.sampled_at_utc >= window_start
                && s.sampled_at_utc <= window_end
        }) {
            latest
                .entry(s.fingerprint_id)
                .and_modify(|existing| {
                    if s.sampled_at_utc > existing.sampled_at_utc {
                        *existing = s;
                    }
                })
                .or_insert(s);
        }
        let mut result: Vec<MetricSample> = latest.into_values().cloned().collect();
        result.sort_by(|a, b| b.total_cpu_us.cmp(&a.total_cpu_us));
        result.truncate(top_n);
        Ok(result)
    }

    async fn purge_samples_older_than(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64> {
        let mut state = self.inner.write().await;
        let before = state.samples.len();
        state.samples.retain(|s| s.sampled_at_utc >= cutoff);
        Ok((before - state.samples.len()) as u64)
    }

    async fn get_last_snapshot(
        &self,
        instance: &str,
        database: &str,
        key: SnapshotKey,
    ) -> MonitorResult<Option<Snapshot>> {
        let state = self.inner.read().await;
        Ok(state
            .snapshots
            .get(&(instance.to_string(), database.to_string(), key.fingerprint_id, key.plan_hash))
            .copied())
    }

    async fn upsert_snapshot(
        &self,
        instance: &str,
        database: &str,
        key: SnapshotKey,
        snapshot: Snapshot,
    ) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        state.snapshots.insert(
            (instance.to_string(), database.to_string(), key.fingerprint_id, key.plan_hash),
            snapshot,
        );
        Ok(())
    }

    async fn purge_stale_snapshots(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64> {
        let mut state = self.inner.write().await;
        let before = state.snapshots.len();
        state.snapshots.retain(|_, s| s.snapshot_time_utc >= cutoff);
        Ok((before - state.snapshots.len()) as u64)
    }

    async fn get_active_baseline(&self, fingerprint_id: Uuid) -> MonitorResult<Option<Baseline>> {
        let state = self.inner.read().await;
        Ok(state
            .baselines
            .get(&fingerprint_id)
            .and_then(|v| v.iter().find(|b| b.is_active).cloned()))
    }

    async fn supersede_active_baseline(&self, fingerprint_id: Uuid) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        if let Some(v) = state.baselines.get_mut(&fingerprint_id) {
            for b in v.iter_mut() {
                b.is_active = false;
            }
        }
        Ok(())
    }

    async fn save_baseline(&self, baseline: Baseline) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        state.baselines.entry(baseline.fingerprint_id).or_default().push(baseline);
        Ok(())
    }

    async fn save_regression(&self, event: RegressionEvent) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        state.regressions.insert(event.id, event);
        Ok(())
    }

    async fn update_regression_status(&self, id: Uuid, status: RegressionStatus) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        if let Some(event) = state.regressions.get_mut(&id) {
            event.status = status;
        }
        Ok(())
    }

    async fn get_active_regression(&self, fingerprint_id: Uuid) -> MonitorResult<Option<RegressionEvent>> {
        let state = self.inner.read().await;
        Ok(state
            .regressions
            .values()
            .find(|r| {
                r.fingerprint_id == fingerprint_id
                    && matches!(r.status, RegressionStatus::New | RegressionStatus::Acknowledged)
            })
            .cloned())
    }

    async fn get_active_regressions(&self) -> MonitorResult<Vec<RegressionEvent>> {
        let state = self.inner.read().await;
        Ok(state
            .regressions
            .values()
            .filter(|r| matches!(r.status, RegressionStatus::New | RegressionStatus::Acknowledged))
            .cloned()
            .collect())
    }

    async fn get_recent_regressions(&self, window_start: DateTime<Utc>) -> MonitorResult<Vec<RegressionEvent>> {
        let state = self.inner.read().await;
        Ok(state
            .regressions
            .values()
            .filter(|r| r.detected_at_utc >= window_start)
            .cloned()
            .collect())
    }

    async fn purge_regressions_older_than(&self, cutoff: DateTime<Utc>) -> MonitorResult<u64> {
        let mut state = self.inner.write().await;
        let before = state.regressions.len();
        state.regressions.retain(|_, r| r.detected_at_utc >= cutoff);
        Ok((before - state.regressions.len()) as u64)
    }

    async fn save_remediation_audit(&self, audit: RemediationAudit) -> MonitorResult<()> {
        let mut state = self.inner.write().await;
        state.remediation_audit.push(audit);
        Ok(())
    }

    async fn recent_remediation_count(&self, instance: &str, since: DateTime<Utc>) -> MonitorResult<u32> {
        let state = self.inner.read().await;
        Ok(state
            .remediation_audit
            .iter()
            .filter(|a| a.instance == instance && a.success && !a.is_dry_run && a.timestamp_utc >= since)
            .count() as u32)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn snapshot_round_trip() {
        let store = InMemoryMetricsStore::new();
        let key = SnapshotKey { fingerprint_id: Uuid::new_v4(), plan_hash: None };
        let snapshot = Snapshot {
            counters: crate::domain::delta::CumulativeCounters::default(),
            snapshot_time_utc: Utc::now(),
        };
        store.upsert_snapshot("inst", "db", key, snapshot).await.unwrap();
        let fetched = store.get_last_snapshot("inst", "db", key).await.unwrap();
        assert_eq!(fetched, Some(snapshot));
    }

    #[tokio::test]
    async fn baseline_supersede_then_save_leaves_one_active() {
        let store = InMemoryMetricsStore::new();
        let fp_id = Uuid::new_v4();
        let now = Utc::now();
        let make = |active: bool| Baseline {
            fingerprint_id: fp_id,
            instance: "inst".into(),
            database: "db".into(),
            computed_at_utc: now,
            window_start_utc: now,
            window_end_utc: now,
            sample_count: 10,
            total_executions: 100,
            median_duration_us: 1.0,
            p95_duration_us: 1.0,
            p99_duration_us: 1.0,
            avg_duration_us: 1.0,
            std_dev_duration_us: 0.0,
            avg_cpu_us: 1.0,
            p95_cpu_us: 1.0,
            avg_logical_reads: 1.0,
            max_logical_reads: 1.0,
            expected_plan_hash: None,
            is_active: active,
        };
        store.save_baseline(make(true)).await.unwrap();
        store.supersede_active_baseline(fp_id).await.unwrap();
        store.save_baseline(make(true)).await.unwrap();
        let active = store.get_active_baseline(fp_id).await.unwrap().unwrap();
        assert!(active.is_active);
    }

    #[tokio::test]
    async fn fingerprint_get_or_create_is_idempotent_per_hash_and_database() {
        let store = InMemoryMetricsStore::new();
        let now = Utc::now();
        let id1 = store
            .get_or_create_fingerprint([1u8; 8], "SELECT 1", "SELECT #", "inst", "db", false, now)
            .await
            .unwrap();
        let id2 = store
            .get_or_create_fingerprint([1u8; 8], "SELECT 1", "SELECT #", "inst", "db", false, now)
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }
}
