//! Turns cumulative, ever-increasing counters into per-cycle deltas.
//!
//! SQL Server's DMVs expose counters that accumulate since the plan was
//! cached; they reset to zero whenever the plan is evicted and recompiled.
//! This is the one piece of the collection pipeline where getting the
//! arithmetic wrong silently corrupts every baseline downstream.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeCounters {
    pub execution_count: u64,
    pub total_cpu_us: u64,
    pub total_duration_us: u64,
    pub total_logical_reads: u64,
    pub total_logical_writes: u64,
    pub total_physical_reads: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub counters: CumulativeCounters,
    pub snapshot_time_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub fingerprint_id: Uuid,
    pub instance: String,
    pub database: String,
    pub sampled_at_utc: DateTime<Utc>,
    pub plan_hash: Option<[u8; 8]>,
    pub execution_count: u64,
    pub total_cpu_us: u64,
    pub avg_cpu_us: f64,
    pub total_duration_us: u64,
    pub avg_duration_us: f64,
    pub total_logical_reads: u64,
    pub total_logical_writes: u64,
    pub total_physical_reads: u64,
    pub was_reset: bool,
}

#[derive(Default, Clone, Copy)]
pub struct DeltaComputer;

impl DeltaComputer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the delta sample for one query given its previous snapshot, if any.
    ///
    /// Returns `None` on the first sighting of a key: there is nothing to
    /// subtract from yet, so no sample is emitted (see Open Question 1 in
    /// DESIGN.md). The caller is still expected to store `current` as the
    /// new snapshot regardless of the return value.
    pub fn compute(
        &self,
        fingerprint_id: Uuid,
        instance: &str,
        database: &str,
        plan_hash: Option<[u8; 8]>,
        previous: Option<Snapshot>,
        current: CumulativeCounters,
        now: DateTime<Utc>,
    ) -> Option<MetricSample> {
        let previous = previous?;

        let was_reset = current.execution_count < previous.counters.execution_count
            || current.total_cpu_us < previous.counters.total_cpu_us
            || current.total_duration_us < previous.counters.total_duration_us;

        let (execution_count, total_cpu_us, total_duration_us, reads, writes, phys_reads) =
            if was_reset {
                (
                    current.execution_count,
                    current.total_cpu_us,
                    current.total_duration_us,
                    current.total_logical_reads,
                    current.total_logical_writes,
                    current.total_physical_reads,
                )
            } else {
                (
                    current.execution_count - previous.counters.execution_count,
                    current.total_cpu_us - previous.counters.total_cpu_us,
                    current.total_duration_us - previous.counters.total_duration_us,
                    current
                        .total_logical_reads
                        .saturating_sub(previous.counters.total_logical_reads),
                    current
                        .total_logical_writes
                        .saturating_sub(previous.counters.total_logical_writes),
                    current
                        .total_physical_reads
                        .saturating_sub(previous.counters.total_physical_reads),
                )
            };

        let avg_cpu_us = if execution_count > 0 { total_cpu_us as f64 / execution_count as f64 } else { 0.0 };
        let avg_duration_us =
            if execution_count > 0 { total_duration_us as f64 / execution_count as f64 } else { 0.0 };

        Some(MetricSample {
            fingerprint_id,
            instance: instance.to_string(),
            database: database.to_string(),
            sampled_at_utc: now,
            plan_hash,
            execution_count,
            total_cpu_us,
            avg_cpu_us,
            total_duration_us,
            avg_duration_us,
            total_logical_reads: reads,
            total_logical_writes: writes,
            total_physical_reads: phys_reads,
            was_reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn counters(exec: u64, cpu: u64, dur: u64) -> CumulativeCounters {
        CumulativeCounters {
            execution_count: exec,
            total_cpu_us: cpu,
            total_duration_us: dur,
            total_logical_reads: 0,
            total_logical_writes: 0,
            total_physical_reads: 0,
        }
    }

    #[test]
    fn first_cycle_emits_no_sample() {
        let dc = DeltaComputer::new();
        let result = dc.compute(
            Uuid::nil(),
            "inst",
            "db",
            None,
            None,
            counters(10, 100, 1000),
            Utc::now(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn normal_progression_is_non_negative_delta() {
        let dc = DeltaComputer::new();
        let prev = Snapshot { counters: counters(10, 100, 1000), snapshot_time_utc: Utc::now() };
        let sample = dc
            .compute(Uuid::nil(), "inst", "db", None, Some(prev), counters(15, 150, 1500), Utc::now())
            .unwrap();
        assert_eq!(sample.execution_count, 5);
        assert_eq!(sample.total_cpu_us, 50);
        assert_eq!(sample.total_duration_us, 500);
        assert!(!sample.was_reset);
    }

    #[test]
    fn reset_reports_current_absolute_values() {
        // scenario S4
        let dc = DeltaComputer::new();
        let prev = Snapshot {
            counters: counters(1000, 50_000_000, 100_000_000),
            snapshot_time_utc: Utc::now(),
        };
        let current = counters(5, 200_000, 500_000);
        let sample = dc
            .compute(Uuid::nil(), "inst", "db", None, Some(prev), current, Utc::now())
            .unwrap();
        assert!(sample.was_reset);
        assert_eq!(sample.execution_count, 5);
        assert_eq!(sample.total_cpu_us, 200_000);
        assert_eq!(sample.total_duration_us, 500_000);
    }
}
