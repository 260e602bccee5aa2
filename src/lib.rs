//! Continuous SQL Server query-performance monitor.
//!
//! This library contains the analytical engine and scheduling fabric: query
//! fingerprinting, delta computation, baselines, regression and hotspot
//! detection, the remediation safety layer, and the job scheduler that
//! drives all of it. `main.rs` wires these into a runnable daemon.

use std::sync::Arc;

pub mod alerting;
pub mod config;
pub mod domain;
pub mod error;
pub mod feature_flags;
pub mod orchestrator;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{MonitorError, MonitorResult};

use alerting::AlertOrchestrator;
use feature_flags::FeatureFlags;
use orchestrator::{AnalysisOrchestrator, CollectionOrchestrator};
use provider::StatsProvider;
use store::MetricsStore;

/// Application shared state.
///
/// Design philosophy carried over from the service this crate grew out of:
/// Rust's type system IS our DI container. Every dependency is an `Arc<dyn
/// Trait>` handed in at construction, no service locator.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricsStore>,
    pub provider: Arc<dyn StatsProvider>,
    pub feature_flags: Arc<dyn FeatureFlags>,
    pub alerts: Arc<AlertOrchestrator>,
    pub collection: Arc<CollectionOrchestrator>,
    pub analysis: Arc<AnalysisOrchestrator>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        provider: Arc<dyn StatsProvider>,
        feature_flags: Arc<dyn FeatureFlags>,
        alerts: Arc<AlertOrchestrator>,
    ) -> Self {
        let collection = Arc::new(CollectionOrchestrator::new(store.clone(), provider.clone()));
        let analysis = Arc::new(AnalysisOrchestrator::new(store.clone()));
        Self { store, provider, feature_flags, alerts, collection, analysis }
    }
}
