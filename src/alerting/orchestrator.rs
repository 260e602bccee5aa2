//! Fans out regression alerts, hotspot summaries, and daily summaries to
//! every enabled channel, concurrently and with per-channel isolation: one
//! channel's failure is logged and never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::alerting::channel::{AlertChannel, DailySummary};
use crate::domain::hotspot::Hotspot;
use crate::domain::regression::{RegressionEvent, Severity};

const COOLDOWN_MAP_EVICTION_THRESHOLD: usize = 1000;

fn parse_severity(s: &str) -> Severity {
    match s.to_lowercase().as_str() {
        "low" => Severity::Low,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        // malformed configuration falls back to Medium rather than failing startup
        _ => Severity::Medium,
    }
}

pub struct AlertOrchestrator {
    channels: Vec<Arc<dyn AlertChannel>>,
    minimum_severity: Severity,
    cooldown: chrono::Duration,
    // Single lock guards the whole cooldown map, per spec.
    last_alert_time: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    enabled: bool,
}

impl AlertOrchestrator {
    pub fn new(
        channels: Vec<Arc<dyn AlertChannel>>,
        minimum_severity: &str,
        cooldown: chrono::Duration,
        enabled: bool,
    ) -> Self {
        Self {
            channels,
            minimum_severity: parse_severity(minimum_severity),
            cooldown,
            last_alert_time: Mutex::new(HashMap::new()),
            enabled,
        }
    }

    pub async fn send_regression_alerts(&self, events: &[RegressionEvent]) {
        if !self.enabled || events.is_empty() {
            return;
        }

        let now = Utc::now();
        let survivors = {
            let mut cooldowns = self.last_alert_time.lock().await;

            if cooldowns.len() > COOLDOWN_MAP_EVICTION_THRESHOLD {
                let cutoff = now - chrono::Duration::days(1);
                cooldowns.retain(|_, last| *last >= cutoff);
            }

            let mut survivors = Vec::new();
            for event in events {
                if event.severity < self.minimum_severity {
                    continue;
                }
                let in_cooldown = cooldowns
                    .get(&event.id)
                    .is_some_and(|last| now - *last < self.cooldown);
                if in_cooldown {
                    continue;
                }
                cooldowns.insert(event.id, now);
                survivors.push(event.clone());
            }
            survivors
        };

        if survivors.is_empty() {
            return;
        }

        self.fan_out(|channel| {
            let survivors = survivors.clone();
            async move { channel.send_regression_alerts(&survivors).await }
        })
        .await;
    }

    pub async fn send_hotspot_summary(&self, hotspots: &[Hotspot]) {
        if !self.enabled || hotspots.is_empty() {
            return;
        }
        let hotspots = hotspots.to_vec();
        self.fan_out(|channel| {
            let hotspots = hotspots.clone();
            async move { channel.send_hotspot_summary(&hotspots).await }
        })
        .await;
    }

    pub async fn send_daily_summary(&self, summary: &DailySummary) {
        if !self.enabled {
            return;
        }
        let summary = summary.clone();
        self.fan_out(|channel| {
            let summary = summary.clone();
            async move { channel.send_daily_summary(&summary).await }
        })
        .await;
    }

    async fn fan_out<F, Fut>(&self, make_future: F)
    where
        F: Fn(Arc<dyn AlertChannel>) -> Fut,
        Fut: std::future::Future<Output = crate::error::MonitorResult<()>> + Send + 'static,
    {
        let mut set = tokio::task::JoinSet::new();
        for channel in self.channels.iter().filter(|c| c.enabled()) {
            let channel = Arc::clone(channel);
            let name = channel.name().to_string();
            let fut = make_future(channel);
            set.spawn(async move {
                if let Err(e) = fut.await {
                    tracing::error!("alert channel '{}' failed: {}", name, e);
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regression::{RegressionMetric, RegressionStatus, RegressionType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl AlertChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }
        fn enabled(&self) -> bool {
            true
        }
        async fn send_regression_alerts(&self, _events: &[RegressionEvent]) -> crate::error::MonitorResult<()> {
            self.count.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(crate::error::MonitorError::channel_failed("counting", "boom"));
            }
            Ok(())
        }
        async fn send_hotspot_summary(&self, _hotspots: &[Hotspot]) -> crate::error::MonitorResult<()> {
            Ok(())
        }
        async fn send_daily_summary(&self, _summary: &DailySummary) -> crate::error::MonitorResult<()> {
            Ok(())
        }
        async fn test_connection(&self) -> crate::error::MonitorResult<()> {
            Ok(())
        }
    }

    fn event(severity: Severity) -> RegressionEvent {
        RegressionEvent {
            id: Uuid::new_v4(),
            fingerprint_id: Uuid::new_v4(),
            instance: "inst".into(),
            database: "db".into(),
            detected_at_utc: Utc::now(),
            event_type: RegressionType::MetricOnly,
            metric: RegressionMetric::P95Duration,
            baseline_value: 1.0,
            current_value: 2.0,
            change_percent: 100.0,
            threshold_percent: 50.0,
            severity,
            old_plan_hash: None,
            new_plan_hash: None,
            status: RegressionStatus::New,
            description: "test".into(),
        }
    }

    #[tokio::test]
    async fn below_minimum_severity_is_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let channel = Arc::new(CountingChannel { count: count.clone(), fail: false });
        let orch = AlertOrchestrator::new(vec![channel], "high", chrono::Duration::seconds(60), true);
        orch.send_regression_alerts(&[event(Severity::Low)]).await;
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alert() {
        let count = Arc::new(AtomicUsize::new(0));
        let channel = Arc::new(CountingChannel { count: count.clone(), fail: false });
        let orch = AlertOrchestrator::new(vec![channel], "low", chrono::Duration::seconds(3600), true);
        let e = event(Severity::High);
        orch.send_regression_alerts(&[e.clone()]).await;
        orch.send_regression_alerts(&[e]).await;
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn one_channel_failure_does_not_block_others() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let a = Arc::new(CountingChannel { count: count_a.clone(), fail: true });
        let b = Arc::new(CountingChannel { count: count_b.clone(), fail: false });
        let orch = AlertOrchestrator::new(vec![a, b], "low", chrono::Duration::seconds(60), true);
        orch.send_regression_alerts(&[event(Severity::High)]).await;
        assert_eq!(count_a.load(Ordering::Relaxed), 1);
        assert_eq!(count_b.load(Ordering::Relaxed), 1);
    }
}
