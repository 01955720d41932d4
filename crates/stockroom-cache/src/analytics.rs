//! Aggregated observability snapshot for the admin surface.
//!
//! Everything here serializes as camelCase JSON so it can be handed straight
//! to a dashboard endpoint.

use serde::Serialize;

use crate::config::{Priority, RefreshPolicy};
use crate::distributed::L2Stats;
use crate::graph::DependencyEdge;
use crate::local::L1Stats;
use crate::stats::QueryStat;

/// One tracked query with its statistics, flattened for the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedQuery {
    pub key: String,
    #[serde(flatten)]
    pub stat: QueryStat,
}

/// Read-only view of a registered warming job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmingJobView {
    pub query_name: String,
    pub key: String,
    pub priority: Priority,
    pub max_age_secs: u64,
    /// Last successful refresh, unix milliseconds; zero if never run.
    pub last_run_ms: i64,
}

/// Point-in-time snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub l1_stats: L1Stats,
    pub l2_stats: L2Stats,
    /// Hottest tracked queries, most accessed first.
    pub query_stats: Vec<TrackedQuery>,
    pub dependency_graph: Vec<DependencyEdge>,
    pub refresh_policy: RefreshPolicy,
    /// Background reloads completed since startup.
    pub background_refreshes: u64,
    pub warming_jobs: Vec<WarmingJobView>,
}
