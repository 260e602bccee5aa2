//! Live, lock-free reads of on/off toggles, with a production-safety
//! override on top of the raw remediation flag.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{Config, EnvironmentConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    PlanCollection,
    Analysis,
    BaselineRebuild,
    DailySummary,
    Alerting,
    Remediation,
    HealthChecks,
    QueryStore,
}

#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn is_enabled(&self, flag: Flag) -> bool;

    /// Combines the global remediation flag, dry-run allowance, and the
    /// production-safety override: a production instance needs
    /// `allow_production_remediation=true` unless running in dry-run mode.
    async fn is_remediation_allowed(&self, instance_is_production: bool) -> bool;
}

/// Reads flags from a live, swappable `Config` snapshot.
pub struct ConfigFeatureFlags {
    config: RwLock<Arc<Config>>,
}

impl ConfigFeatureFlags {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config: RwLock::new(config) }
    }

    pub async fn swap(&self, config: Arc<Config>) {
        *self.config.write().await = config;
    }
}

#[async_trait]
impl FeatureFlags for ConfigFeatureFlags {
    async fn is_enabled(&self, flag: Flag) -> bool {
        let config = self.config.read().await;
        match flag {
            Flag::PlanCollection => config.plan_collection.enabled,
            Flag::Analysis => config.analysis.enabled,
            Flag::BaselineRebuild => config.scheduling.baseline_rebuild_enabled,
            Flag::DailySummary => config.alerting.send_daily_summary,
            Flag::Alerting => config.alerting.enabled,
            Flag::Remediation => config.security.enable_remediation,
            Flag::HealthChecks => config.health_checks_enabled,
            Flag::QueryStore => config.plan_collection.prefer_query_store,
        }
    }

    async fn is_remediation_allowed(&self, instance_is_production: bool) -> bool {
        let config = self.config.read().await;
        if !config.security.enable_remediation {
            return false;
        }
        if config.security.dry_run_mode {
            return true;
        }
        if instance_is_production && config.security.environment == EnvironmentConfig::Production {
            return config.security.allow_production_remediation;
        }
        true
    }
}
