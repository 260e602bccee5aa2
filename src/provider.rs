//! The stats-provider contract: reading cumulative query statistics off a
//! monitored SQL Server instance. The actual DMV/Query Store dialect is
//! outside this crate's scope; this module only defines the shape a real
//! provider would fill in, plus a static test double.

use async_trait::async_trait;

use crate::domain::delta::CumulativeCounters;
use crate::error::MonitorResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    TotalCpuTime,
    TotalDuration,
    TotalLogicalReads,
    ExecutionCount,
}

#[derive(Debug, Clone)]
pub struct RawQueryStat {
    pub sql_text: String,
    pub server_query_hash: Option<[u8; 8]>,
    pub plan_hash: Option<[u8; 8]>,
    pub query_store_query_id: Option<i64>,
    pub counters: CumulativeCounters,
}

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Fetch the top-N queries for a database ordered by `order_by`, over a
    /// recent lookback window expressed in seconds.
    async fn get_top_queries(
        &self,
        instance: &str,
        database: &str,
        top_n: usize,
        lookback_secs: u64,
        order_by: OrderBy,
    ) -> MonitorResult<Vec<RawQueryStat>>;

    /// Whether Query Store is enabled for this database. Providers should
    /// treat "object does not exist" as `Ok(false)`, not an error, and fall
    /// back silently to the DMV path.
    async fn is_query_store_enabled(&self, instance: &str, database: &str) -> MonitorResult<bool>;
}

/// Fixed-data test double: returns whatever was seeded, regardless of
/// parameters. Used by orchestrator unit tests and as a smoke-test default.
#[derive(Default, Clone)]
pub struct StaticStatsProvider {
    pub stats: Vec<RawQueryStat>,
    pub query_store_enabled: bool,
}

impl StaticStatsProvider {
    pub fn new(stats: Vec<RawQueryStat>, query_store_enabled: bool) -> Self {
        Self { stats, query_store_enabled }
    }
}

#[async_trait]
impl StatsProvider for StaticStatsProvider {
    async fn get_top_queries(
        &self,
        _instance: &str,
        _database: &str,
        top_n: usize,
        _lookback_secs: u64,
        _order_by: OrderBy,
    ) -> MonitorResult<Vec<RawQueryStat>> {
        Ok(self.stats.iter().take(top_n).cloned().collect())
    }

    async fn is_query_store_enabled(&self, _instance: &str, _database: &str) -> MonitorResult<bool> {
        Ok(self.query_store_enabled)
    }
}
