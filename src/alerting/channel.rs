//! Alert channel contract, plus a logging reference implementation standing
//! in for the SMTP/Teams/Slack wire encodings, which are out of scope here.

use async_trait::async_trait;

use crate::domain::hotspot::Hotspot;
use crate::domain::regression::RegressionEvent;
use crate::error::MonitorResult;

#[derive(Debug, Clone)]
pub struct DailySummary {
    pub instances_monitored: usize,
    pub total_fingerprints: usize,
    pub new_regressions: usize,
    pub auto_resolved_regressions: usize,
    pub top_hotspots: Vec<Hotspot>,
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    fn enabled(&self) -> bool;

    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()>;
    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()>;
    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()>;
    async fn test_connection(&self) -> MonitorResult<()>;
}

/// Emits structured `tracing` events instead of reaching out over the wire.
/// Useful standalone (logs are themselves a legitimate sink) and as the
/// default when no external channel is configured.
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self { name: name.into(), enabled }
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn send_regression_alerts(&self, events: &[RegressionEvent]) -> MonitorResult<()> {
        for event in events {
            tracing::warn!(
                channel = %self.name,
                fingerprint_id = %event.fingerprint_id,
                instance = %event.instance,
                database = %event.database,
                severity = ?event.severity,
                change_percent = event.change_percent,
                "regression alert: {}",
                event.description,
            );
        }
        Ok(())
    }

    async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) -> MonitorResult<()> {
        for hotspot in hotspots {
            tracing::info!(
                channel = %self.name,
                fingerprint_id = %hotspot.fingerprint_id,
                rank = hotspot.rank,
                percent_of_total = hotspot.percent_of_total,
                "hotspot"
            );
        }
        Ok(())
    }

    async fn send_daily_summary(&self, summary: &DailySummary) -> MonitorResult<()> {
        tracing::info!(
            channel = %self.name,
            instances = summary.instances_monitored,
            fingerprints = summary.total_fingerprints,
            new_regressions = summary.new_regressions,
            auto_resolved = summary.auto_resolved_regressions,
            "daily summary"
        );
        Ok(())
    }

    async fn test_connection(&self) -> MonitorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::hotspot::RankingMetric;
    use crate::domain::regression::{RegressionMetric, RegressionStatus, RegressionType, Severity};
    use chrono::Utc;
    use uuid::Uuid;

    fn event() -> RegressionEvent {
        RegressionEvent {
            id: Uuid::new_v4(),
            fingerprint_id: Uuid::new_v4(),
            instance: "inst".into(),
            database: "db".into(),
            detected_at_utc: Utc::now(),
            event_type: RegressionType::MetricOnly,
            metric: RegressionMetric::P95Duration,
            baseline_value: 1000.0,
            current_value: 2000.0,
            change_percent: 100.0,
            threshold_percent: 50.0,
            severity: Severity::Medium,
            old_plan_hash: None,
            new_plan_hash: None,
            status: RegressionStatus::New,
            description: "p95 duration up 100%".into(),
        }
    }

    fn hotspot() -> Hotspot {
        Hotspot {
            fingerprint_id: Uuid::new_v4(),
            instance: "inst".into(),
            database: "db".into(),
            rank: 1,
            ranking_metric: RankingMetric::TotalCpuTime,
            ranking_value: 5000.0,
            total_cpu_ms: 5000.0,
            total_duration_ms: 5200.0,
            total_logical_reads: 100.0,
            avg_duration_ms: 52.0,
            execution_count: 100,
            percent_of_total: 100.0,
            has_active_regression: false,
            window_start_utc: Utc::now(),
            window_end_utc: Utc::now(),
        }
    }

    #[tokio::test]
    async fn log_channel_reports_its_own_name_and_enabled_state() {
        let channel = LogChannel::new("primary", true);
        assert_eq!(channel.name(), "primary");
        assert!(channel.enabled());
    }

    #[tokio::test]
    async fn log_channel_never_fails_any_send() {
        let channel = LogChannel::new("primary", true);
        assert!(channel.send_regression_alerts(&[event()]).await.is_ok());
        assert!(channel.send_hotspot_summary(&[hotspot()]).await.is_ok());
        let summary = DailySummary {
            instances_monitored: 2,
            total_fingerprints: 10,
            new_regressions: 1,
            auto_resolved_regressions: 0,
            top_hotspots: vec![hotspot()],
        };
        assert!(channel.send_daily_summary(&summary).await.is_ok());
        assert!(channel.test_connection().await.is_ok());
    }
}
