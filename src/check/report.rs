use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::{CheckOnCluster, FromRow, MergeStrategies, QuerySource, SchemaContext};
use crate::cluster::ClusterConnection;
use crate::diagnostic::Diagnostic;
use crate::error::HealthResult;

/// The full set of enabled rules bound to one cluster
pub struct DatabaseChecks<T> {
    checks: Vec<CheckOnCluster<T>>,
}

impl<T: FromRow> DatabaseChecks<T> {
    /// Build one cluster check per rule
    ///
    /// Fails on the first rule running across the cluster that has no entry in
    /// `strategies`, before any query is issued.
    pub fn new<I>(
        cluster: Arc<ClusterConnection>,
        queries: Arc<dyn QuerySource>,
        strategies: &MergeStrategies<T>,
        diagnostics: I,
    ) -> HealthResult<Self>
    where
        I: IntoIterator<Item = Diagnostic>,
    {
        let mut checks: Vec<CheckOnCluster<T>> = Vec::new();
        for diagnostic in diagnostics {
            if checks.iter().any(|check| check.diagnostic() == diagnostic) {
                continue;
            }
            checks.push(CheckOnCluster::new(
                Arc::clone(&cluster),
                diagnostic,
                Arc::clone(&queries),
                strategies.get(diagnostic),
            )?);
        }
        Ok(Self { checks })
    }

    /// Every registered rule
    pub fn all(
        cluster: Arc<ClusterConnection>,
        queries: Arc<dyn QuerySource>,
        strategies: &MergeStrategies<T>,
    ) -> HealthResult<Self> {
        Self::new(cluster, queries, strategies, Diagnostic::all())
    }

    pub fn get(&self, diagnostic: Diagnostic) -> Option<&CheckOnCluster<T>> {
        self.checks
            .iter()
            .find(|check| check.diagnostic() == diagnostic)
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = Diagnostic> + '_ {
        self.checks.iter().map(CheckOnCluster::diagnostic)
    }

    /// Run every rule in order, stopping at the first failing one
    pub async fn collect<F>(
        &self,
        ctx: &SchemaContext,
        filter: F,
    ) -> HealthResult<Vec<(Diagnostic, Vec<T>)>>
    where
        F: Fn(&T) -> bool,
    {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let records = check.check(ctx, &filter).await?;
            results.push((check.diagnostic(), records));
        }
        Ok(results)
    }

    /// Violation count per rule
    pub async fn report<F>(&self, ctx: &SchemaContext, filter: F) -> HealthResult<HealthReport>
    where
        F: Fn(&T) -> bool,
    {
        let entries = self
            .collect(ctx, filter)
            .await?
            .into_iter()
            .map(|(diagnostic, records)| (diagnostic, records.len()))
            .collect();
        let report = HealthReport { entries };
        info!(
            "Checked schema {} with {} rules, {} violations",
            ctx.schema_name(),
            report.entries.len(),
            report.total()
        );
        Ok(report)
    }
}

/// Per-rule violation counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    entries: Vec<(Diagnostic, usize)>,
}

impl HealthReport {
    pub fn entries(&self) -> &[(Diagnostic, usize)] {
        &self.entries
    }

    pub fn count(&self, diagnostic: Diagnostic) -> Option<usize> {
        self.entries
            .iter()
            .find(|(d, _)| *d == diagnostic)
            .map(|(_, count)| *count)
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn is_healthy(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (diagnostic, count) in &self.entries {
            writeln!(f, "{}:{}", diagnostic, count)?;
        }
        Ok(())
    }
}
