/// pghealth - structural and performance health checks for PostgreSQL clusters
///
/// A cluster is reached through one or more multi-host connection strings. Every
/// member gets its own connection, the current primary is tracked by a background
/// refresher, and each diagnostic rule runs either on the primary only or on
/// every member with the per-host results merged into one list.
pub mod check;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod diagnostic;
pub mod error;
pub mod health;

pub use check::{
    CheckOnCluster, DatabaseChecks, DatabaseManagement, HealthReport, MergeStrategies,
    SchemaContext,
};
pub use cluster::{ClusterConnection, ClusterConnectionFactory};
pub use config::Config;
pub use connection::{Connection, ConnectionCredentials, Host};
pub use diagnostic::{Diagnostic, ExecutionTopology};
pub use error::{HealthError, HealthResult};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::check::{DirectoryQuerySource, QuerySource};
use crate::connection::postgres::PgConnectionFactory;
use crate::connection::{ConnectionFactory, Row};

/// Runs the configured diagnostics against one cluster
pub struct PgHealth {
    config: Config,
    connections: Arc<dyn ConnectionFactory>,
    queries: Arc<dyn QuerySource>,
}

impl PgHealth {
    /// Checker using `tokio-postgres` and the configured SQL directory
    pub fn new(config: Config) -> Self {
        let queries = Arc::new(DirectoryQuerySource::new(&config.checks.sql_dir));
        Self {
            config,
            connections: Arc::new(PgConnectionFactory),
            queries,
        }
    }

    pub fn with_connection_factory(mut self, connections: Arc<dyn ConnectionFactory>) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_query_source(mut self, queries: Arc<dyn QuerySource>) -> Self {
        self.queries = queries;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect, run every enabled rule once and release the cluster
    pub async fn run(&self) -> HealthResult<HealthReport> {
        let ctx = self.config.checks.schema_context()?;
        let cluster = self.connect().await?;
        info!(
            "Running {} diagnostics on schema {}",
            self.config.checks.enabled_diagnostics().len(),
            ctx.schema_name()
        );

        let outcome = match DatabaseChecks::<Row>::new(
            Arc::clone(&cluster),
            Arc::clone(&self.queries),
            &MergeStrategies::standard(),
            self.config.checks.enabled_diagnostics(),
        ) {
            Ok(checks) => checks.report(&ctx, |_| true).await,
            Err(e) => Err(e),
        };

        cluster.shutdown().await;
        outcome
    }

    /// Reset statistics on every member; true only if all of them succeeded
    pub async fn reset_statistics(&self) -> HealthResult<bool> {
        let cluster = self.connect().await?;
        let reset = DatabaseManagement::new(Arc::clone(&cluster))
            .reset_statistics()
            .await;
        cluster.shutdown().await;
        Ok(reset)
    }

    /// Last statistics reset on the primary, `None` when never reset
    pub async fn last_stats_reset_timestamp(&self) -> HealthResult<Option<DateTime<Utc>>> {
        let cluster = self.connect().await?;
        let outcome = DatabaseManagement::new(Arc::clone(&cluster))
            .last_stats_reset_timestamp()
            .await;
        cluster.shutdown().await;
        outcome
    }

    async fn connect(&self) -> HealthResult<Arc<ClusterConnection>> {
        self.config.validate()?;
        let credentials = self.config.cluster.credentials()?;
        let cluster = ClusterConnectionFactory::from_config(
            Arc::clone(&self.connections),
            &self.config.cluster,
        )
        .connect(&credentials)
        .await?;
        Ok(Arc::new(cluster))
    }
}
