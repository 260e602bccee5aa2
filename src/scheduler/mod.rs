//! Job scheduling fabric: periodic jobs with startup delay and exponential
//! backoff on failure, plus daily-time-of-day jobs. A fixed-interval loop
//! generalized with a backoff curve and a sleep-until-next-target mode cron
//! would otherwise cover.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

/// Shared cooperative-cancellation handle. Cloned into every job; flipping
/// it from `main` triggers a prompt unwind out of any in-progress sleep.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
}

fn backoff_duration(config: BackoffConfig, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64.checked_shl(consecutive_failures.saturating_sub(1)).unwrap_or(u64::MAX);
    let scaled = config.base.as_millis().saturating_mul(factor as u128);
    let capped = scaled.min(config.max.as_millis());
    Duration::from_millis(capped as u64)
}

/// Runs `body` every `interval`, after an initial `startup_delay`. On
/// failure, sleeps an exponentially growing backoff (capped at
/// `backoff.max`) instead of `interval` before the next attempt; on success
/// the failure counter resets. Cancellation is checked before every sleep
/// and every invocation so a cancelled job unwinds promptly.
pub async fn run_periodic<F, Fut>(
    name: &str,
    startup_delay: Duration,
    interval: Duration,
    backoff: BackoffConfig,
    cancellation: CancellationToken,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    tracing::info!("starting periodic job '{}', startup delay {:?}, interval {:?}", name, startup_delay, interval);
    if !sleep_cancellable(startup_delay, &cancellation).await {
        tracing::info!("periodic job '{}' cancelled during startup delay", name);
        return;
    }

    let consecutive_failures = AtomicU32::new(0);

    loop {
        if cancellation.is_cancelled() {
            break;
        }

        match body().await {
            Ok(()) => {
                consecutive_failures.store(0, Ordering::Relaxed);
                tracing::debug!("periodic job '{}' completed", name);
            }
            Err(e) => {
                let failures = consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!("periodic job '{}' failed (consecutive failures: {}): {}", name, failures, e);
                let wait = backoff_duration(backoff, failures);
                if wait > Duration::ZERO {
                    tracing::warn!("periodic job '{}' backing off for {:?}", name, wait);
                    if !sleep_cancellable(wait, &cancellation).await {
                        break;
                    }
                    continue;
                }
            }
        }

        if cancellation.is_cancelled() {
            break;
        }
        if !sleep_cancellable(interval, &cancellation).await {
            break;
        }
    }
    tracing::info!("periodic job '{}' stopped", name);
}

/// Runs `body` once a day at `(hour, minute)` UTC, sleeping until the next
/// occurrence rather than polling on a fixed tick.
pub async fn run_daily_at<F, Fut>(
    name: &str,
    hour: u32,
    minute: u32,
    cancellation: CancellationToken,
    mut body: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    tracing::info!("starting daily job '{}' at {:02}:{:02} UTC", name, hour, minute);
    loop {
        let wait = duration_until_next(hour, minute);
        tracing::debug!("daily job '{}' sleeping {:?} until next run", name, wait);
        if !sleep_cancellable(wait, &cancellation).await {
            break;
        }
        if cancellation.is_cancelled() {
            break;
        }
        match body().await {
            Ok(()) => tracing::info!("daily job '{}' completed", name),
            Err(e) => tracing::error!("daily job '{}' failed: {}", name, e),
        }
    }
    tracing::info!("daily job '{}' stopped", name);
}

fn duration_until_next(hour: u32, minute: u32) -> Duration {
    let now = Utc::now();
    let today_target = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("validated hour/minute");
    let target = if today_target > now.naive_utc() {
        today_target
    } else {
        today_target + chrono::Duration::days(1)
    };
    let delta = target - now.naive_utc();
    Duration::from_millis(delta.num_milliseconds().max(0) as u64)
}

/// Sleeps for `duration`, waking early (and returning `false`) if
/// cancellation is observed. Returns `true` if the full sleep elapsed.
async fn sleep_cancellable(duration: Duration, cancellation: &CancellationToken) -> bool {
    const POLL_INTERVAL: Duration = Duration::from_millis(200);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancellation.is_cancelled() {
            return false;
        }
        let chunk = remaining.min(POLL_INTERVAL);
        sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
    !cancellation.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = BackoffConfig { base: Duration::from_secs(1), max: Duration::from_secs(10) };
        assert_eq!(backoff_duration(config, 0), Duration::ZERO);
        assert_eq!(backoff_duration(config, 1), Duration::from_secs(1));
        assert_eq!(backoff_duration(config, 2), Duration::from_secs(2));
        assert_eq!(backoff_duration(config, 3), Duration::from_secs(4));
        assert_eq!(backoff_duration(config, 10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn periodic_job_resets_failure_count_on_success() {
        let cancellation = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));
        let runs_clone = runs.clone();
        let cancel_clone = cancellation.clone();
        let handle = tokio::spawn(async move {
            run_periodic(
                "test",
                Duration::from_millis(0),
                Duration::from_millis(20),
                BackoffConfig { base: Duration::from_millis(10), max: Duration::from_millis(50) },
                cancel_clone,
                move || {
                    let runs = runs_clone.clone();
                    async move {
                        runs.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                },
            )
            .await;
        });
        sleep(Duration::from_millis(80)).await;
        cancellation.cancel();
        let _ = handle.await;
        assert!(runs.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn duration_until_next_is_never_negative_and_within_a_day() {
        let d = duration_until_next(12, 0);
        assert!(d <= Duration::from_secs(86400));
    }
}
