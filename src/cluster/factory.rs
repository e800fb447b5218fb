use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ClusterConnection, DEFAULT_PRIMARY_REFRESH_INTERVAL};
use crate::config::ClusterConfig;
use crate::connection::{url, Connection, ConnectionCredentials, ConnectionFactory};
use crate::error::{HealthError, HealthResult};
use crate::health::{PgPrimaryDetector, PrimaryDetector};

/// Builds a `ClusterConnection` from credentials
///
/// Every connection string is expanded into per-host URLs, one connection is
/// opened per distinct `host:port`, and the first member reporting primary
/// becomes the initial primary.
pub struct ClusterConnectionFactory {
    connections: Arc<dyn ConnectionFactory>,
    detector: Arc<dyn PrimaryDetector>,
    refresh_interval: Duration,
}

impl ClusterConnectionFactory {
    pub fn new(connections: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            connections,
            detector: Arc::new(PgPrimaryDetector::new()),
            refresh_interval: DEFAULT_PRIMARY_REFRESH_INTERVAL,
        }
    }

    /// Factory using the probe timeout and refresh interval of `config`
    pub fn from_config(connections: Arc<dyn ConnectionFactory>, config: &ClusterConfig) -> Self {
        Self::new(connections)
            .with_detector(Arc::new(PgPrimaryDetector::with_timeout(
                config.probe_timeout(),
            )))
            .with_refresh_interval(config.primary_refresh_interval())
    }

    pub fn with_detector(mut self, detector: Arc<dyn PrimaryDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub async fn connect(
        &self,
        credentials: &ConnectionCredentials,
    ) -> HealthResult<ClusterConnection> {
        let mut members: BTreeMap<String, Connection> = BTreeMap::new();
        for cluster_url in credentials.urls() {
            for (address, host_url) in url::extract_url_for_each_host(cluster_url)? {
                if members.contains_key(&address) {
                    continue;
                }
                debug!("Opening connection to {}", address);
                let connection =
                    Connection::open(&host_url, credentials, self.connections.as_ref()).await?;
                members.insert(address, connection);
            }
        }

        let primary = self.find_primary(members.values()).await?;
        info!(
            "Connected to cluster of {} hosts, primary is {}",
            members.len(),
            primary.host()
        );

        ClusterConnection::new(
            primary,
            members.into_values(),
            Arc::clone(&self.detector),
            self.refresh_interval,
        )
    }

    async fn find_primary<'a, I>(&self, members: I) -> HealthResult<Connection>
    where
        I: Iterator<Item = &'a Connection>,
    {
        let mut probed = Vec::new();
        for member in members {
            probed.push(member.host().address());
            match self.detector.is_primary(member).await {
                Ok(true) => return Ok(member.clone()),
                Ok(false) => {}
                Err(e) => warn!("Primary detection failed for host {}: {}", member.host(), e),
            }
        }
        Err(HealthError::PrimaryNotFound {
            hosts: probed.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::MockConnectionFactory;

    fn credentials(urls: &[&str]) -> ConnectionCredentials {
        ConnectionCredentials::new(urls.iter().copied(), "monitor", "secret").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_picks_reporting_primary() {
        let connections = Arc::new(MockConnectionFactory::with_primary("h2:5432"));
        let factory = ClusterConnectionFactory::new(connections.clone());

        let cluster = factory
            .connect(&credentials(&["pg://h3:5432,h1:5432,h2:5432/db"]))
            .await
            .unwrap();

        assert_eq!(cluster.current_primary().host().address(), "h2:5432");
        let addresses: Vec<String> = cluster
            .all_members()
            .iter()
            .map(|member| member.host().address())
            .collect();
        assert_eq!(addresses, vec!["h1:5432", "h2:5432", "h3:5432"]);
        assert!(cluster.is_monitoring());
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_shared_by_urls_open_once() {
        let connections = Arc::new(MockConnectionFactory::with_primary("h1:5432"));
        let factory = ClusterConnectionFactory::new(connections.clone())
            .with_refresh_interval(Duration::from_secs(5));

        let cluster = factory
            .connect(&credentials(&[
                "pg://h1:5432,h2:5432/db",
                "pg://h2:5432/db?targetServerType=secondary",
            ]))
            .await
            .unwrap();

        assert_eq!(cluster.all_members().len(), 2);
        assert_eq!(connections.connected_urls().len(), 2);
        assert_eq!(cluster.refresh_interval(), Duration::from_secs(5));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_primary_is_an_error() {
        let connections = Arc::new(MockConnectionFactory::new());
        let factory = ClusterConnectionFactory::new(connections.clone());

        let result = factory
            .connect(&credentials(&["pg://h1:5432,h2:5432/db"]))
            .await;
        match result {
            Err(HealthError::PrimaryNotFound { hosts }) => assert_eq!(hosts, "h1:5432, h2:5432"),
            Err(other) => panic!("Expected PrimaryNotFound, got {:?}", other),
            Ok(_) => panic!("Expected PrimaryNotFound"),
        }
    }

    #[tokio::test]
    async fn test_single_host_cluster() {
        let connections = Arc::new(MockConnectionFactory::with_primary("h1:5432"));
        let factory = ClusterConnectionFactory::new(connections);

        let cluster = factory
            .connect(&credentials(&["jdbc:postgresql://h1:5432/db"]))
            .await
            .unwrap();
        assert!(!cluster.is_monitoring());
        assert_eq!(cluster.current_primary().host().address(), "h1:5432");
    }
}
