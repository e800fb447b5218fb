use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use super::management::DatabaseManagement;
use super::{CheckOnHost, FromRow, QuerySource, SchemaContext};
use crate::cluster::ClusterConnection;
use crate::connection::{Connection, Host};
use crate::diagnostic::{Diagnostic, ExecutionTopology};
use crate::error::{HealthError, HealthResult, HostFailure};

/// Combines one result list per host into a single list
pub type MergeFn<T> = Arc<dyn Fn(Vec<Vec<T>>) -> Vec<T> + Send + Sync>;

/// One rule bound to a whole cluster
///
/// Rules running on the primary follow `current_primary()` at call time.
/// Rules running across the cluster query every member and merge the lists.
/// Per-host checks are created on first use and cached by host.
/// `unused_indexes` logs each member's last statistics reset before running.
pub struct CheckOnCluster<T> {
    cluster: Arc<ClusterConnection>,
    diagnostic: Diagnostic,
    queries: Arc<dyn QuerySource>,
    merge: Option<MergeFn<T>>,
    checks: DashMap<Host, Arc<CheckOnHost<T>>>,
    statistics: Option<DatabaseManagement>,
}

impl<T: FromRow> CheckOnCluster<T> {
    /// Fails with `MissingMergeStrategy` when a rule running across the cluster has no merge
    pub fn new(
        cluster: Arc<ClusterConnection>,
        diagnostic: Diagnostic,
        queries: Arc<dyn QuerySource>,
        merge: Option<MergeFn<T>>,
    ) -> HealthResult<Self> {
        if diagnostic.is_across_cluster() && merge.is_none() {
            return Err(HealthError::MissingMergeStrategy { diagnostic });
        }
        let statistics = (diagnostic == Diagnostic::UnusedIndexes)
            .then(|| DatabaseManagement::new(Arc::clone(&cluster)));
        Ok(Self {
            cluster,
            diagnostic,
            queries,
            merge,
            checks: DashMap::new(),
            statistics,
        })
    }

    pub fn diagnostic(&self) -> Diagnostic {
        self.diagnostic
    }

    /// Run the rule and keep the records accepted by `filter`
    pub async fn check<F>(&self, ctx: &SchemaContext, filter: F) -> HealthResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        let records = match self.diagnostic.topology() {
            ExecutionTopology::OnPrimary => self.execute_on_primary(ctx).await?,
            ExecutionTopology::AcrossCluster => self.execute_across_cluster(ctx).await?,
        };
        Ok(records.into_iter().filter(|record| filter(record)).collect())
    }

    /// Run the rule without filtering
    pub async fn check_all(&self, ctx: &SchemaContext) -> HealthResult<Vec<T>> {
        self.check(ctx, |_| true).await
    }

    async fn execute_on_primary(&self, ctx: &SchemaContext) -> HealthResult<Vec<T>> {
        let primary = self.cluster.current_primary();
        debug!("Going to execute {} on primary host {}", self.diagnostic, primary.host());
        let check = self.check_for(&primary)?;
        check.execute(ctx).await.map_err(|e| HealthError::RuleExecutionFailed {
            diagnostic: self.diagnostic,
            failures: vec![HostFailure {
                host: primary.host().address(),
                reason: e.to_string(),
            }],
        })
    }

    async fn execute_across_cluster(&self, ctx: &SchemaContext) -> HealthResult<Vec<T>> {
        let merge = self
            .merge
            .as_ref()
            .ok_or(HealthError::MissingMergeStrategy {
                diagnostic: self.diagnostic,
            })?;

        let mut checks = Vec::new();
        for member in self.cluster.all_members() {
            debug!("Going to execute {} on host {}", self.diagnostic, member.host().name());
            if let Some(statistics) = &self.statistics {
                statistics.log_last_stats_reset(member).await;
            }
            checks.push(self.check_for(member)?);
        }

        let results = join_all(checks.iter().map(|check| check.execute(ctx))).await;

        let mut lists = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (check, result) in checks.iter().zip(results) {
            match result {
                Ok(records) => lists.push(records),
                Err(e) => failures.push(HostFailure {
                    host: check.connection().host().address(),
                    reason: e.to_string(),
                }),
            }
        }
        if !failures.is_empty() {
            return Err(HealthError::RuleExecutionFailed {
                diagnostic: self.diagnostic,
                failures,
            });
        }

        Ok(merge(lists))
    }

    fn check_for(&self, connection: &Arc<Connection>) -> HealthResult<Arc<CheckOnHost<T>>> {
        if let Some(check) = self.checks.get(connection.host()) {
            return Ok(Arc::clone(check.value()));
        }
        let entry = self.checks.entry(connection.host().clone());
        let check = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let check = Arc::new(CheckOnHost::new(
                    Arc::clone(connection),
                    self.diagnostic,
                    self.queries.as_ref(),
                )?);
                vacant.insert(Arc::clone(&check));
                check
            }
        };
        Ok(check)
    }

    #[cfg(test)]
    fn cached_hosts(&self) -> usize {
        self.checks.len()
    }
}
