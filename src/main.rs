use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbwatch::alerting::{AlertOrchestrator, LogChannel};
use dbwatch::config::{parse_time_of_day, Config};
use dbwatch::feature_flags::ConfigFeatureFlags;
use dbwatch::provider::StaticStatsProvider;
use dbwatch::scheduler::{run_daily_at, run_periodic, BackoffConfig, CancellationToken};
use dbwatch::store::InMemoryMetricsStore;
use dbwatch::AppState;

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("dbwatch.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked intentionally: the guard must outlive the process, and main
        // never returns before shutdown anyway.
        Box::leak(Box::new(guard));
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_logging(&config);
    tracing::info!("dbwatch starting up");
    tracing::info!(instances = config.instances.len(), "configuration loaded");

    let store = InMemoryMetricsStore::new();
    let provider = Arc::new(StaticStatsProvider::default());
    let feature_flags = Arc::new(ConfigFeatureFlags::new(Arc::new(config.clone())));

    let channels: Vec<Arc<dyn dbwatch::alerting::AlertChannel>> =
        vec![Arc::new(LogChannel::new("log", config.alerting.enabled))];
    let alerts = Arc::new(AlertOrchestrator::new(
        channels,
        &config.alerting.minimum_severity,
        chrono::Duration::seconds(config.alerting.alert_cooldown_period as i64),
        config.alerting.enabled,
    ));

    let state = AppState::new(store, provider, feature_flags, alerts);
    let config = Arc::new(config);

    let backoff = BackoffConfig {
        base: Duration::from_secs(config.scheduling.failure_backoff),
        max: Duration::from_secs(config.scheduling.max_failure_backoff),
    };

    let collection_cancel = CancellationToken::new();
    let collection_handle = {
        let state = state.clone();
        let config = config.clone();
        let cancel = collection_cancel.clone();
        let enabled = config.plan_collection.enabled;
        let interval = Duration::from_secs(config.plan_collection.interval);
        let startup_delay = Duration::from_secs(config.scheduling.startup_delay_collection_secs);
        tokio::spawn(async move {
            if !enabled {
                tracing::info!("plan collection disabled, job not started");
                return;
            }
            run_periodic("collection", startup_delay, interval, backoff, cancel, || {
                let state = state.clone();
                let config = config.clone();
                async move {
                    let outcome = state.collection.run_cycle(&config).await;
                    tracing::info!(
                        instances = outcome.instances_processed,
                        databases = outcome.databases_processed,
                        samples = outcome.samples_collected,
                        errors = outcome.errors.len(),
                        "collection cycle complete"
                    );
                    if outcome.errors.len() == outcome.databases_processed && outcome.databases_processed > 0 {
                        anyhow::bail!("every database failed in this collection cycle");
                    }
                    Ok(())
                }
            })
            .await;
        })
    };

    let analysis_cancel = CancellationToken::new();
    let analysis_handle = {
        let state = state.clone();
        let config = config.clone();
        let cancel = analysis_cancel.clone();
        let enabled = config.analysis.enabled;
        let interval = Duration::from_secs(config.analysis.analysis_interval);
        let startup_delay = Duration::from_secs(config.scheduling.startup_delay_analysis_secs);
        tokio::spawn(async move {
            if !enabled {
                tracing::info!("analysis disabled, job not started");
                return;
            }
            run_periodic("analysis", startup_delay, interval, backoff, cancel, || {
                let state = state.clone();
                let config = config.clone();
                async move {
                    let outcome = state.analysis.run_cycle(&config).await;
                    let regressions: usize = outcome.results.iter().map(|r| r.regressions_detected).sum();
                    tracing::info!(
                        databases = outcome.results.len(),
                        regressions,
                        errors = outcome.errors.len(),
                        "analysis cycle complete"
                    );

                    let events = state.store.get_recent_regressions(
                        chrono::Utc::now() - chrono::Duration::seconds(config.analysis.analysis_interval as i64),
                    ).await?;
                    state.alerts.send_regression_alerts(&events).await;

                    let resolved = state.analysis.check_auto_resolutions(&config.analysis).await?;
                    if resolved > 0 {
                        tracing::info!(resolved, "auto-resolved regressions back within tolerance");
                    }
                    Ok(())
                }
            })
            .await;
        })
    };

    let baseline_cancel = CancellationToken::new();
    let baseline_handle = {
        let state = state.clone();
        let config = config.clone();
        let cancel = baseline_cancel.clone();
        let enabled = config.scheduling.baseline_rebuild_enabled;
        let (hour, minute) = parse_time_of_day(&config.scheduling.baseline_rebuild_time_of_day).unwrap_or((3, 0));
        tokio::spawn(async move {
            if !enabled {
                tracing::info!("baseline rebuild disabled, job not started");
                return;
            }
            run_daily_at("baseline-rebuild", hour, minute, cancel, || {
                let state = state.clone();
                let config = config.clone();
                async move {
                    let outcome = state.analysis.rebuild_all(&config).await;
                    let rebuilt: usize = outcome.results.iter().map(|r| r.fingerprints_evaluated).sum();
                    tracing::info!(rebuilt, errors = outcome.errors.len(), "baseline rebuild complete");
                    Ok(())
                }
            })
            .await;
        })
    };

    let summary_cancel = CancellationToken::new();
    let summary_handle = {
        let state = state.clone();
        let config = config.clone();
        let cancel = summary_cancel.clone();
        let enabled = config.alerting.send_daily_summary;
        let (hour, minute) = parse_time_of_day(&config.scheduling.daily_summary_time_of_day).unwrap_or((6, 0));
        tokio::spawn(async move {
            if !enabled {
                tracing::info!("daily summary disabled, job not started");
                return;
            }
            run_daily_at("daily-summary", hour, minute, cancel, || {
                let state = state.clone();
                let config = config.clone();
                async move {
                    let window_start = chrono::Utc::now() - chrono::Duration::days(1);
                    let recent = state.store.get_recent_regressions(window_start).await?;
                    let new_regressions = recent
                        .iter()
                        .filter(|e| e.status == dbwatch::domain::regression::RegressionStatus::New)
                        .count();
                    let auto_resolved = recent
                        .iter()
                        .filter(|e| e.status == dbwatch::domain::regression::RegressionStatus::AutoResolved)
                        .count();
                    let top_hotspots = state
                        .analysis
                        .top_hotspots(&config, config.alerting.max_hotspots_in_summary)
                        .await?;

                    let enabled_instances = config.instances.iter().filter(|i| i.enabled);
                    let mut total_fingerprints = 0;
                    let mut instances_monitored = 0;
                    for instance in enabled_instances {
                        instances_monitored += 1;
                        for database in &instance.databases {
                            total_fingerprints +=
                                state.store.list_fingerprints(&instance.name, database).await?.len();
                        }
                    }

                    let summary = dbwatch::alerting::DailySummary {
                        instances_monitored,
                        total_fingerprints,
                        new_regressions,
                        auto_resolved_regressions: auto_resolved,
                        top_hotspots,
                    };
                    state.alerts.send_daily_summary(&summary).await;
                    Ok(())
                }
            })
            .await;
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, cancelling jobs");
    collection_cancel.cancel();
    analysis_cancel.cancel();
    baseline_cancel.cancel();
    summary_cancel.cancel();

    tokio::time::sleep(Duration::from_secs(config.scheduling.shutdown_grace_period_secs)).await;
    for handle in [collection_handle, analysis_handle, baseline_handle, summary_handle] {
        handle.abort();
    }

    tracing::info!("dbwatch shut down");
    Ok(())
}
