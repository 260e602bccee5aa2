//! Layered configuration: TOML file -> `APP_*` environment variables ->
//! CLI flags, in ascending priority, validated once at startup.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::remediation::{Environment, GuardMode, RiskLevel};
use crate::domain::hotspot::RankingMetric;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instances: Vec<InstanceConfig>,
    pub plan_collection: PlanCollectionConfig,
    pub analysis: AnalysisConfig,
    pub scheduling: SchedulingConfig,
    pub security: SecurityConfig,
    pub alerting: AlertingConfig,
    pub logging: LoggingConfig,
    pub health_checks_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            plan_collection: PlanCollectionConfig::default(),
            analysis: AnalysisConfig::default(),
            scheduling: SchedulingConfig::default(),
            security: SecurityConfig::default(),
            alerting: AlertingConfig::default(),
            logging: LoggingConfig::default(),
            health_checks_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub connection_string: String,
    pub databases: Vec<String>,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCollectionConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub interval: u64,
    pub top_n: usize,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub lookback_window: u64,
    pub minimum_execution_count: u64,
    pub max_instance_parallelism: usize,
    pub max_database_parallelism: usize,
    pub prefer_query_store: bool,
}

impl Default for PlanCollectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            top_n: 50,
            lookback_window: 300,
            minimum_execution_count: 1,
            max_instance_parallelism: 1,
            max_database_parallelism: 1,
            prefer_query_store: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetricConfig {
    TotalCpuTime,
    TotalDuration,
    TotalLogicalReads,
    AvgDuration,
    ExecutionCount,
}

impl From<RankingMetricConfig> for RankingMetric {
    fn from(value: RankingMetricConfig) -> Self {
        match value {
            RankingMetricConfig::TotalCpuTime => RankingMetric::TotalCpuTime,
            RankingMetricConfig::TotalDuration => RankingMetric::TotalDuration,
            RankingMetricConfig::TotalLogicalReads => RankingMetric::TotalLogicalReads,
            RankingMetricConfig::AvgDuration => RankingMetric::AvgDuration,
            RankingMetricConfig::ExecutionCount => RankingMetric::ExecutionCount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionRulesConfig {
    pub minimum_baseline_samples: usize,
    pub minimum_executions: u64,
    pub duration_increase_threshold_percent: f64,
    pub cpu_increase_threshold_percent: f64,
    pub logical_reads_increase_threshold_percent: f64,
    pub require_multiple_metrics: bool,
}

impl Default for RegressionRulesConfig {
    fn default() -> Self {
        Self {
            minimum_baseline_samples: 10,
            minimum_executions: 5,
            duration_increase_threshold_percent: 50.0,
            cpu_increase_threshold_percent: 50.0,
            logical_reads_increase_threshold_percent: 50.0,
            require_multiple_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotRulesConfig {
    pub ranking_metric: RankingMetricConfig,
    pub top_n: usize,
    pub min_total_cpu_ms: f64,
    pub min_total_duration_ms: f64,
    pub min_execution_count: u64,
    pub min_avg_duration_ms: f64,
    pub include_queries_with_regressions: bool,
}

impl Default for HotspotRulesConfig {
    fn default() -> Self {
        Self {
            ranking_metric: RankingMetricConfig::TotalCpuTime,
            top_n: 20,
            min_total_cpu_ms: 0.0,
            min_total_duration_ms: 0.0,
            min_execution_count: 0,
            min_avg_duration_ms: 0.0,
            include_queries_with_regressions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub recent_window: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub hotspot_window: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub analysis_interval: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub auto_resolution_check_interval: u64,
    pub auto_resolution_tolerance_percent: f64,
    pub baseline_lookback_days: u32,
    pub minimum_baseline_samples: usize,
    pub regression_rules: RegressionRulesConfig,
    pub hotspot_rules: HotspotRulesConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recent_window: 300,
            hotspot_window: 3600,
            analysis_interval: 120,
            auto_resolution_check_interval: 600,
            auto_resolution_tolerance_percent: 20.0,
            baseline_lookback_days: 7,
            minimum_baseline_samples: 10,
            regression_rules: RegressionRulesConfig::default(),
            hotspot_rules: HotspotRulesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub startup_delay_collection_secs: u64,
    pub startup_delay_analysis_secs: u64,
    pub baseline_rebuild_time_of_day: String,
    pub daily_summary_time_of_day: String,
    pub baseline_rebuild_enabled: bool,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub failure_backoff: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub max_failure_backoff: u64,
    pub shutdown_grace_period_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            startup_delay_collection_secs: 5,
            startup_delay_analysis_secs: 90,
            baseline_rebuild_time_of_day: "02:00".to_string(),
            daily_summary_time_of_day: "08:00".to_string(),
            baseline_rebuild_enabled: true,
            failure_backoff: 5,
            max_failure_backoff: 300,
            shutdown_grace_period_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub mode: GuardModeConfig,
    pub environment: EnvironmentConfig,
    pub enable_remediation: bool,
    pub dry_run_mode: bool,
    pub allow_production_remediation: bool,
    pub max_remediations_per_hour: u32,
    pub excluded_databases: Vec<String>,
    pub approval_threshold: RiskLevelConfig,
    pub maintenance_window_required: bool,
    pub maintenance_window_start_hour: u8,
    pub maintenance_window_end_hour: u8,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: GuardModeConfig::ReadOnly,
            environment: EnvironmentConfig::Dev,
            enable_remediation: false,
            dry_run_mode: true,
            allow_production_remediation: false,
            max_remediations_per_hour: 3,
            excluded_databases: Vec::new(),
            approval_threshold: RiskLevelConfig::High,
            maintenance_window_required: false,
            maintenance_window_start_hour: 22,
            maintenance_window_end_hour: 4,
        }
    }
}

impl SecurityConfig {
    pub fn maintenance_hours(&self) -> (u8, u8) {
        (self.maintenance_window_start_hour, self.maintenance_window_end_hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardModeConfig {
    ReadOnly,
    SuggestRemediation,
    AutoApplyLowRisk,
}

impl From<GuardModeConfig> for GuardMode {
    fn from(value: GuardModeConfig) -> Self {
        match value {
            GuardModeConfig::ReadOnly => GuardMode::ReadOnly,
            GuardModeConfig::SuggestRemediation => GuardMode::SuggestRemediation,
            GuardModeConfig::AutoApplyLowRisk => GuardMode::AutoApplyLowRisk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentConfig {
    Dev,
    Staging,
    Production,
}

impl From<EnvironmentConfig> for Environment {
    fn from(value: EnvironmentConfig) -> Self {
        match value {
            EnvironmentConfig::Dev => Environment::Dev,
            EnvironmentConfig::Staging => Environment::Staging,
            EnvironmentConfig::Production => Environment::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevelConfig {
    Low,
    Medium,
    High,
    Critical,
}

impl From<RiskLevelConfig> for RiskLevel {
    fn from(value: RiskLevelConfig) -> Self {
        match value {
            RiskLevelConfig::Low => RiskLevel::Low,
            RiskLevelConfig::Medium => RiskLevel::Medium,
            RiskLevelConfig::High => RiskLevel::High,
            RiskLevelConfig::Critical => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub minimum_severity: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub alert_cooldown_period: u64,
    pub max_hotspots_in_summary: usize,
    pub send_daily_summary: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_severity: "medium".to_string(),
            alert_cooldown_period: 1800,
            max_hotspots_in_summary: 10,
            send_daily_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

/// Command-line overrides, highest priority. Mirrors the handful of knobs an
/// operator most commonly wants to flip without touching the TOML file.
#[derive(Parser, Debug, Default)]
#[command(name = "dbwatch", about = "Continuous SQL Server query performance monitor")]
pub struct CommandLineArgs {
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long)]
    pub collection_interval: Option<u64>,

    #[arg(long)]
    pub analysis_interval: Option<u64>,

    #[arg(long)]
    pub dry_run: Option<bool>,

    #[arg(long)]
    pub remediation_mode: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let args = CommandLineArgs::parse();
        Self::load_from(args)
    }

    pub fn load_from(args: CommandLineArgs) -> anyhow::Result<Self> {
        let mut config = match args.config.as_deref().map(Path::new).map(Path::to_path_buf).or_else(find_config_file) {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::warn!("no config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&args);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
        tracing::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("APP_LOGGING_LEVEL") {
            tracing::info!("Override logging.level from env: {}", level);
            self.logging.level = level;
        }
        if let Ok(secs) = std::env::var("APP_PLAN_COLLECTION_INTERVAL") {
            if let Ok(secs) = parse_duration_to_secs(&secs) {
                tracing::info!("Override plan_collection.interval from env: {}s", secs);
                self.plan_collection.interval = secs;
            }
        }
        if let Ok(secs) = std::env::var("APP_ANALYSIS_INTERVAL") {
            if let Ok(secs) = parse_duration_to_secs(&secs) {
                tracing::info!("Override analysis.analysis_interval from env: {}s", secs);
                self.analysis.analysis_interval = secs;
            }
        }
        if let Ok(enabled) = std::env::var("APP_ENABLE_REMEDIATION") {
            if let Ok(enabled) = enabled.parse::<bool>() {
                tracing::info!("Override security.enable_remediation from env: {}", enabled);
                self.security.enable_remediation = enabled;
            }
        }
        if let Ok(dry_run) = std::env::var("APP_DRY_RUN_MODE") {
            if let Ok(dry_run) = dry_run.parse::<bool>() {
                tracing::info!("Override security.dry_run_mode from env: {}", dry_run);
                self.security.dry_run_mode = dry_run;
            }
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(level) = &args.log_level {
            tracing::info!("Override logging.level from CLI: {}", level);
            self.logging.level = level.clone();
        }
        if let Some(secs) = args.collection_interval {
            tracing::info!("Override plan_collection.interval from CLI: {}s", secs);
            self.plan_collection.interval = secs;
        }
        if let Some(secs) = args.analysis_interval {
            tracing::info!("Override analysis.analysis_interval from CLI: {}s", secs);
            self.analysis.analysis_interval = secs;
        }
        if let Some(dry_run) = args.dry_run {
            tracing::info!("Override security.dry_run_mode from CLI: {}", dry_run);
            self.security.dry_run_mode = dry_run;
        }
        if let Some(mode) = &args.remediation_mode {
            let parsed = match mode.to_lowercase().as_str() {
                "readonly" => Some(GuardModeConfig::ReadOnly),
                "suggest" => Some(GuardModeConfig::SuggestRemediation),
                "autolowrisk" => Some(GuardModeConfig::AutoApplyLowRisk),
                _ => None,
            };
            if let Some(parsed) = parsed {
                tracing::info!("Override security.mode from CLI: {:?}", parsed);
                self.security.mode = parsed;
            } else {
                tracing::warn!("ignoring unrecognized --remediation-mode value: {}", mode);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.plan_collection.interval == 0 {
            anyhow::bail!("plan_collection.interval must be > 0");
        }
        if self.plan_collection.top_n == 0 {
            anyhow::bail!("plan_collection.top_n must be > 0");
        }
        if self.analysis.analysis_interval == 0 {
            anyhow::bail!("analysis.analysis_interval must be > 0");
        }
        if self.analysis.regression_rules.duration_increase_threshold_percent <= 0.0 {
            anyhow::bail!("analysis.regression_rules.duration_increase_threshold_percent must be > 0");
        }
        if self.security.max_remediations_per_hour == 0 {
            anyhow::bail!("security.max_remediations_per_hour must be > 0");
        }
        if self.security.maintenance_window_start_hour > 23 || self.security.maintenance_window_end_hour > 23 {
            anyhow::bail!("security.maintenance_window hours must be 0-23");
        }
        parse_time_of_day(&self.scheduling.baseline_rebuild_time_of_day)
            .ok_or_else(|| anyhow::anyhow!("scheduling.baseline_rebuild_time_of_day must be HH:MM"))?;
        parse_time_of_day(&self.scheduling.daily_summary_time_of_day)
            .ok_or_else(|| anyhow::anyhow!("scheduling.daily_summary_time_of_day must be HH:MM"))?;
        Ok(())
    }
}

fn find_config_file() -> Option<PathBuf> {
    for candidate in ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Parse an `HH:MM` time-of-day string into (hour, minute).
pub fn parse_time_of_day(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn default_true() -> bool {
    true
}

/// Accepts either a plain integer (seconds) or a human-friendly duration
/// string such as "30s", "5m", "1h", "7d", "2w".
pub fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer number of seconds or a duration string like '30s'/'5m'/'1h'")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v.max(0) as u64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_duration_to_secs(v).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

pub fn parse_duration_to_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    if s.len() < 2 {
        return Err(format!("invalid duration: {s}"));
    }
    let (number_part, unit) = s.split_at(s.len() - 1);
    let number: u64 = number_part
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    match unit {
        "s" => Ok(number),
        "m" => Ok(number * 60),
        "h" => Ok(number * 3600),
        "d" => Ok(number * 86400),
        "w" => Ok(number * 604800),
        other => Err(format!("unrecognized duration unit '{other}' in '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_fails_validation() {
        let mut config = Config::default();
        config.plan_collection.interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_human_friendly_durations() {
        assert_eq!(parse_duration_to_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert_eq!(parse_duration_to_secs("7d").unwrap(), 604800);
        assert_eq!(parse_duration_to_secs("2w").unwrap(), 1_209_600);
        assert_eq!(parse_duration_to_secs("42").unwrap(), 42);
    }

    #[test]
    fn rejects_bad_time_of_day() {
        assert!(parse_time_of_day("25:00").is_none());
        assert!(parse_time_of_day("bad").is_none());
        assert_eq!(parse_time_of_day("02:00"), Some((2, 0)));
    }
}
