//! Drives one collection cycle across every enabled instance/database pair:
//! fetch top-N queries, fingerprint, delta against the last snapshot, persist.

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::domain::delta::DeltaComputer;
use crate::domain::fingerprint::Fingerprinter;
use crate::error::MonitorError;
use crate::provider::{OrderBy, StatsProvider};
use crate::store::{MetricsStore, SnapshotKey};

#[derive(Debug, Default)]
pub struct CollectionOutcome {
    pub instances_processed: usize,
    pub databases_processed: usize,
    pub samples_collected: usize,
    pub errors: Vec<(String, MonitorError)>,
}

pub struct CollectionOrchestrator {
    store: Arc<dyn MetricsStore>,
    provider: Arc<dyn StatsProvider>,
    fingerprinter: Fingerprinter,
    delta_computer: DeltaComputer,
}

impl CollectionOrchestrator {
    pub fn new(store: Arc<dyn MetricsStore>, provider: Arc<dyn StatsProvider>) -> Self {
        Self { store, provider, fingerprinter: Fingerprinter::new(), delta_computer: DeltaComputer::new() }
    }

    pub async fn run_cycle(&self, config: &Config) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();
        let plan_collection = &config.plan_collection;

        for instance in config.instances.iter().filter(|i| i.enabled) {
            outcome.instances_processed += 1;
            for database in &instance.databases {
                outcome.databases_processed += 1;
                match self.collect_one_database(instance, database, plan_collection).await {
                    Ok(count) => outcome.samples_collected += count,
                    Err(e) => {
                        tracing::error!("collection failed for {}/{}: {}", instance.name, database, e);
                        outcome.errors.push((format!("{}/{}", instance.name, database), e));
                    }
                }
            }
        }
        outcome
    }

    async fn collect_one_database(
        &self,
        instance: &crate::config::InstanceConfig,
        database: &str,
        plan_collection: &crate::config::PlanCollectionConfig,
    ) -> Result<usize, MonitorError> {
        let now = Utc::now();
        let raw_stats = self
            .provider
            .get_top_queries(
                &instance.name,
                database,
                plan_collection.top_n,
                plan_collection.lookback_window,
                OrderBy::TotalCpuTime,
            )
            .await?;

        let mut samples = Vec::new();
        for stat in raw_stats {
            if stat.counters.execution_count < plan_collection.minimum_execution_count {
                continue;
            }

            let fingerprint_result = match &stat.server_query_hash {
                Some(hash) => self.fingerprinter.fingerprint_from_server_hash(hash, &stat.sql_text),
                None => self.fingerprinter.fingerprint(&stat.sql_text),
            };
            let fingerprint_result = match fingerprint_result {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("skipping unfingerprintable query on {}/{}: {}", instance.name, database, e);
                    continue;
                }
            };

            let fingerprint_id = self
                .store
                .get_or_create_fingerprint(
                    fingerprint_result.hash,
                    &fingerprint_result.sample_text,
                    &fingerprint_result.normalized_text,
                    &instance.name,
                    database,
                    fingerprint_result.from_server_hash,
                    now,
                )
                .await?;

            let key = SnapshotKey { fingerprint_id, plan_hash: stat.plan_hash };
            let previous = self.store.get_last_snapshot(&instance.name, database, key).await?;

            if let Some(sample) = self.delta_computer.compute(
                fingerprint_id,
                &instance.name,
                database,
                stat.plan_hash,
                previous,
                stat.counters,
                now,
            ) {
                samples.push(sample);
            }

            self.store
                .upsert_snapshot(
                    &instance.name,
                    database,
                    key,
                    crate::domain::delta::Snapshot { counters: stat.counters, snapshot_time_utc: now },
                )
                .await?;
        }

        let count = samples.len();
        if !samples.is_empty() {
            self.store.save_samples(&samples).await?;
        }
        Ok(count)
    }
}
