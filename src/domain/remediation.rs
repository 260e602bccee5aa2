//! The safety layer around any write action, plus the advisor that only
//! ever proposes actions and never performs them.
//!
//! The guard is modeled as a pure state machine returning a policy decision
//! value rather than raising - a denial is an ordinary outcome, not a bug.

use chrono::{DateTime, Timelike, Utc};
use uuid::Uuid;

use crate::domain::regression::{RegressionEvent, RegressionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    ReadOnly,
    SuggestRemediation,
    AutoApplyLowRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Production,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub mode: GuardMode,
    pub environment: Environment,
    pub enable_remediation: bool,
    pub dry_run_mode: bool,
    pub approval_threshold: RiskLevel,
    pub max_per_hour: u32,
    pub excluded_databases: Vec<String>,
    pub maintenance_window_required: bool,
    /// (start_hour, end_hour) in UTC, 0-23. May cross midnight (start > end).
    pub maintenance_hours: (u8, u8),
}

const SYSTEM_DATABASES: &[&str] = &["master", "msdb", "model", "tempdb", "resource"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Permitted { is_dry_run: bool },
    Denied { reason: String, alternative: Option<String> },
}

impl GuardDecision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, GuardDecision::Permitted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemediationRequest<'a> {
    pub instance: &'a str,
    pub database: &'a str,
    pub risk_level: RiskLevel,
}

#[derive(Default, Clone, Copy)]
pub struct RemediationGuard;

impl RemediationGuard {
    pub fn new() -> Self {
        Self
    }

    /// `recent_audit_count` is the count of successful, non-dry-run audit
    /// records for this instance within the trailing hour, or `None` if the
    /// count itself could not be obtained (fail-closed).
    pub fn check(
        &self,
        config: &GuardConfig,
        request: RemediationRequest,
        recent_audit_count: Option<u32>,
        now: DateTime<Utc>,
    ) -> GuardDecision {
        if !config.enable_remediation {
            return GuardDecision::Denied {
                reason: "remediation is globally disabled".into(),
                alternative: None,
            };
        }

        if config.mode == GuardMode::ReadOnly {
            return GuardDecision::Denied {
                reason: "guard is in read-only mode".into(),
                alternative: None,
            };
        }

        let db_lower = request.database.to_lowercase();
        if SYSTEM_DATABASES.contains(&db_lower.as_str()) {
            return GuardDecision::Denied {
                reason: format!("{} is a system database", request.database),
                alternative: None,
            };
        }

        if config
            .excluded_databases
            .iter()
            .any(|d| d.to_lowercase() == db_lower)
        {
            return GuardDecision::Denied {
                reason: format!("{} is in the excluded database list", request.database),
                alternative: None,
            };
        }

        if config.mode == GuardMode::SuggestRemediation {
            return GuardDecision::Denied {
                reason: "guard mode only surfaces suggestions, does not apply them".into(),
                alternative: Some("review the suggestion and apply manually".into()),
            };
        }

        if config.mode == GuardMode::AutoApplyLowRisk && request.risk_level > RiskLevel::Low {
            return GuardDecision::Denied {
                reason: format!(
                    "risk level {:?} exceeds auto-apply-low-risk mode's ceiling",
                    request.risk_level
                ),
                alternative: None,
            };
        }

        match recent_audit_count {
            None => {
                return GuardDecision::Denied {
                    reason: "could not verify rate limit, failing closed".into(),
                    alternative: None,
                }
            }
            Some(count) if count >= config.max_per_hour => {
                return GuardDecision::Denied {
                    reason: format!(
                        "rate limit reached: {} remediations in the last hour (max {})",
                        count, config.max_per_hour
                    ),
                    alternative: None,
                }
            }
            _ => {}
        }

        if config.maintenance_window_required && !in_maintenance_window(config.maintenance_hours, now) {
            return GuardDecision::Denied {
                reason: format!(
                    "outside maintenance window {:?}-{:?} UTC",
                    config.maintenance_hours.0, config.maintenance_hours.1
                ),
                alternative: Some("retry during the next maintenance window".into()),
            };
        }

        if request.risk_level >= config.approval_threshold {
            return GuardDecision::Denied {
                reason: format!(
                    "risk level {:?} requires out-of-band approval (threshold {:?})",
                    request.risk_level, config.approval_threshold
                ),
                alternative: Some("obtain approval and apply manually".into()),
            };
        }

        GuardDecision::Permitted { is_dry_run: config.dry_run_mode }
    }
}

fn in_maintenance_window(hours: (u8, u8), now: DateTime<Utc>) -> bool {
    let hour = now.hour() as u8;
    let (start, end) = hours;
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationType {
    ForcePlan,
    UpdateStatistics,
    CreateIndex,
    ClearPlanCache,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    Safe,
    RequiresReview,
    ManualOnly,
}

#[derive(Debug, Clone)]
pub struct RemediationSuggestion {
    pub id: Uuid,
    pub remediation_type: RemediationType,
    pub title: String,
    pub description: String,
    pub script: Option<String>,
    pub safety: Safety,
    pub confidence: f64,
    pub priority: u8,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone)]
pub struct RemediationAudit {
    pub id: Uuid,
    pub timestamp_utc: DateTime<Utc>,
    pub instance: String,
    pub database: String,
    pub fingerprint_id: Uuid,
    pub suggestion_id: Option<Uuid>,
    pub remediation_type: RemediationType,
    pub sql_statement: String,
    pub is_dry_run: bool,
    pub success: bool,
    pub error_message: Option<String>,
    pub sql_error_number: Option<i32>,
    pub duration_ms: u64,
    pub initiator: String,
    pub machine_name: String,
    pub service_version: String,
}

/// Produces suggestions from a detected regression. Never touches a
/// database handle and never consults the guard - it only ever returns data.
#[derive(Default, Clone, Copy)]
pub struct RemediationAdvisor;

impl RemediationAdvisor {
    pub fn new() -> Self {
        Self
    }

    pub fn suggest(&self, event: &RegressionEvent, baseline_sample_count: usize) -> Vec<RemediationSuggestion> {
        let mut suggestions = Vec::new();

        if matches!(
            event.event_type,
            RegressionType::PlanChange | RegressionType::PlanChangeWithRegression
        ) {
            if let Some(old_hash) = event.old_plan_hash {
                suggestions.push(RemediationSuggestion {
                    id: Uuid::new_v4(),
                    remediation_type: RemediationType::ForcePlan,
                    title: "Force previous execution plan".into(),
                    description: format!(
                        "The query's plan changed away from the expected plan {:02x?}; forcing it back may restore performance, but may itself regress once data shape has moved on.",
                        old_hash
                    ),
                    script: None,
                    safety: Safety::RequiresReview,
                    confidence: 0.6,
                    priority: 1,
                    risk_level: RiskLevel::Medium,
                });
            }
        }

        if event.metric == crate::domain::regression::RegressionMetric::AvgLogicalReads
            && baseline_sample_count >= 30
        {
            suggestions.push(RemediationSuggestion {
                id: Uuid::new_v4(),
                remediation_type: RemediationType::UpdateStatistics,
                title: "Update statistics".into(),
                description: "Logical reads increased with a stable plan; stale statistics are a common cause.".into(),
                script: None,
                safety: Safety::Safe,
                confidence: 0.7,
                priority: 2,
                risk_level: RiskLevel::Low,
            });
        }

        if matches!(
            event.metric,
            crate::domain::regression::RegressionMetric::P95Duration
                | crate::domain::regression::RegressionMetric::P95Cpu
        ) && event.event_type == RegressionType::MetricOnly
        {
            suggestions.push(RemediationSuggestion {
                id: Uuid::new_v4(),
                remediation_type: RemediationType::CreateIndex,
                title: "Consider a supporting index".into(),
                description: "Sustained duration/CPU regression with no plan change; an index may help, but the advisor only sees the fingerprint, not the actual predicates.".into(),
                script: None,
                safety: Safety::RequiresReview,
                confidence: 0.4,
                priority: 3,
                risk_level: RiskLevel::Medium,
            });
        }

        if event.severity == crate::domain::regression::Severity::Critical {
            suggestions.push(RemediationSuggestion {
                id: Uuid::new_v4(),
                remediation_type: RemediationType::ClearPlanCache,
                title: "Clear plan cache for this statement".into(),
                description: "Critical regression; clearing the cached plan forces a recompile on next execution.".into(),
                script: None,
                safety: Safety::ManualOnly,
                confidence: 0.3,
                priority: 4,
                risk_level: RiskLevel::High,
            });
        }

        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn base_config() -> GuardConfig {
        GuardConfig {
            mode: GuardMode::AutoApplyLowRisk,
            environment: Environment::Production,
            enable_remediation: true,
            dry_run_mode: false,
            approval_threshold: RiskLevel::High,
            max_per_hour: 5,
            excluded_databases: vec![],
            maintenance_window_required: false,
            maintenance_hours: (22, 4),
        }
    }

    #[test]
    fn s7_auto_apply_denies_above_low_risk() {
        let guard = RemediationGuard::new();
        let config = base_config();
        let decision = guard.check(
            &config,
            RemediationRequest { instance: "inst", database: "Orders", risk_level: RiskLevel::Medium },
            Some(0),
            Utc::now(),
        );
        match decision {
            GuardDecision::Denied { reason, .. } => assert!(reason.contains("Medium")),
            _ => panic!("expected denial"),
        }
    }

    #[test]
    fn s7_denies_system_database() {
        let guard = RemediationGuard::new();
        let config = base_config();
        let decision = guard.check(
            &config,
            RemediationRequest { instance: "inst", database: "tempdb", risk_level: RiskLevel::Low },
            Some(0),
            Utc::now(),
        );
        match decision {
            GuardDecision::Denied { reason, .. } => assert!(reason.contains("system database")),
            _ => panic!("expected denial"),
        }
    }

    #[test]
    fn s7_denies_outside_maintenance_window() {
        let guard = RemediationGuard::new();
        let mut config = base_config();
        config.maintenance_window_required = true;
        config.maintenance_hours = (22, 4);
        // noon UTC is outside a 22:00-04:00 window
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let decision = guard.check(
            &config,
            RemediationRequest { instance: "inst", database: "Orders", risk_level: RiskLevel::Low },
            Some(0),
            now,
        );
        match decision {
            GuardDecision::Denied { reason, .. } => assert!(reason.contains("maintenance window")),
            _ => panic!("expected denial"),
        }
    }

    #[test]
    fn maintenance_window_crosses_midnight_correctly() {
        assert!(in_maintenance_window((22, 4), Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap()));
        assert!(in_maintenance_window((22, 4), Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap()));
        assert!(!in_maintenance_window((22, 4), Utc.with_ymd_and_hms(2026, 1, 1, 5, 0, 0).unwrap()));
    }

    #[test]
    fn fails_closed_when_rate_unknown() {
        let guard = RemediationGuard::new();
        let mut config = base_config();
        config.mode = GuardMode::ReadOnly;
        let decision = guard.check(
            &config,
            RemediationRequest { instance: "inst", database: "Orders", risk_level: RiskLevel::Low },
            None,
            Utc::now(),
        );
        assert!(!decision.is_permitted());
    }

    #[test]
    fn readonly_mode_denies_everything() {
        let guard = RemediationGuard::new();
        let mut config = base_config();
        config.mode = GuardMode::ReadOnly;
        let decision = guard.check(
            &config,
            RemediationRequest { instance: "inst", database: "Orders", risk_level: RiskLevel::Low },
            Some(0),
            Utc::now(),
        );
        assert!(!decision.is_permitted());
    }
}
