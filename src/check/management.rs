//! Statistics maintenance across a cluster
//!
//! Usage-based rules such as `unused_indexes` are only meaningful relative to
//! the last time the statistics counters were reset, so the reset date of each
//! host is logged before those rules run there.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::ClusterConnection;
use crate::connection::{Connection, Host};
use crate::error::{HealthResult, QueryError};

/// Resets every statistics counter of the current database
pub const RESET_STATISTICS_QUERY: &str = "select pg_stat_reset()";

/// Last reset of the current database's counters, null when never reset
pub const LAST_STATS_RESET_QUERY: &str =
    "select stats_reset from pg_stat_database where datname = current_database()";

/// Statistics maintenance bound to one host
pub struct StatisticsOnHost {
    connection: Arc<Connection>,
}

impl StatisticsOnHost {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Reset the counters; true when the server acknowledged the reset
    pub async fn reset_statistics(&self) -> Result<bool, QueryError> {
        let rows = self
            .connection
            .handle()
            .query(RESET_STATISTICS_QUERY, &[])
            .await?;
        Ok(rows.len() == 1)
    }

    pub async fn last_stats_reset_timestamp(&self) -> Result<Option<DateTime<Utc>>, QueryError> {
        let rows = self
            .connection
            .handle()
            .query(LAST_STATS_RESET_QUERY, &[])
            .await?;
        match rows.first() {
            Some(row) => row.get_timestamp("stats_reset"),
            None => Ok(None),
        }
    }
}

/// Log line describing how long ago statistics were reset
pub fn reset_date_message(reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match reset {
        Some(reset) => format!(
            "Last statistics reset on this host was {} days ago ({})",
            (now - reset).num_days(),
            reset.to_rfc3339()
        ),
        None => "Statistics have never been reset on this host".to_string(),
    }
}

/// Statistics operations over a whole cluster
///
/// Per-host objects are created on first use and cached by host, so reset
/// and timestamp lookups against the same member share one instance.
pub struct DatabaseManagement {
    cluster: Arc<ClusterConnection>,
    statistics: DashMap<Host, Arc<StatisticsOnHost>>,
}

impl DatabaseManagement {
    pub fn new(cluster: Arc<ClusterConnection>) -> Self {
        Self {
            cluster,
            statistics: DashMap::new(),
        }
    }

    /// Reset statistics on every member
    ///
    /// Every member is attempted even after a failure. Returns true only when
    /// all of them acknowledged the reset; query errors are logged and count
    /// as a failed reset.
    pub async fn reset_statistics(&self) -> bool {
        let mut result = true;
        for member in self.cluster.all_members() {
            debug!("Going to execute on host {}", member.host().name());
            let reset = match self.statistics_for(member).reset_statistics().await {
                Ok(reset) => reset,
                Err(e) => {
                    warn!("Statistics reset failed on host {}: {}", member.host(), e);
                    false
                }
            };
            result = result && reset;
        }
        result
    }

    /// Last statistics reset on the current primary
    pub async fn last_stats_reset_timestamp(&self) -> HealthResult<Option<DateTime<Utc>>> {
        let primary = self.cluster.current_primary();
        debug!("Going to execute on primary host {}", primary.host().name());
        Ok(self
            .statistics_for(&primary)
            .last_stats_reset_timestamp()
            .await?)
    }

    /// Log the last statistics reset of `member`; a failed lookup is only logged
    pub async fn log_last_stats_reset(&self, member: &Arc<Connection>) {
        match self.statistics_for(member).last_stats_reset_timestamp().await {
            Ok(reset) => info!(
                "{}: {}",
                member.host().name(),
                reset_date_message(reset, Utc::now())
            ),
            Err(e) => warn!(
                "Cannot read last statistics reset on host {}: {}",
                member.host(),
                e
            ),
        }
    }

    fn statistics_for(&self, connection: &Arc<Connection>) -> Arc<StatisticsOnHost> {
        if let Some(statistics) = self.statistics.get(connection.host()) {
            return Arc::clone(statistics.value());
        }
        let statistics = self
            .statistics
            .entry(connection.host().clone())
            .or_insert_with(|| Arc::new(StatisticsOnHost::new(Arc::clone(connection))));
        Arc::clone(statistics.value())
    }

    #[cfg(test)]
    fn cached_hosts(&self) -> usize {
        self.statistics.len()
    }
}
