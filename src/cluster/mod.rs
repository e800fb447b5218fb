//! Cluster-wide connection with a continuously refreshed primary
//!
//! `ClusterConnection` owns one connection per cluster member plus a cached
//! pointer to the member believed to be primary. For clusters with two or more
//! members a background task re-probes every member on a fixed interval and
//! swaps the pointer when a member reports itself primary.
//!
//! Probe failures never clear the cached primary: a stale but reachable answer
//! is preferred over none. If several members report primary in the same cycle
//! (split brain during failover) the last one in member order wins. This is an
//! accepted race, not a single-primary guarantee; callers needing strict
//! semantics must coordinate outside this crate.

pub mod factory;

pub use factory::ClusterConnectionFactory;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{HealthError, HealthResult};
use crate::health::PrimaryDetector;

/// Default interval between two primary refresh cycles
pub const DEFAULT_PRIMARY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// State shared with the refresh task
struct ClusterState {
    primary: RwLock<Arc<Connection>>,
    members: Vec<Arc<Connection>>,
}

impl ClusterState {
    /// Probe every member once and move the primary pointer to reporting members
    async fn refresh_primary(&self, detector: &dyn PrimaryDetector) {
        for member in &self.members {
            match detector.is_primary(member).await {
                Ok(true) => {
                    let previous = {
                        let mut primary = self.primary.write();
                        std::mem::replace(&mut *primary, Arc::clone(member))
                    };
                    if previous.host() != member.host() {
                        info!("Primary moved from {} to {}", previous.host(), member.host());
                    } else {
                        debug!("Current primary is {}", member.host().url());
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Primary detection failed for host {}: {}", member.host(), e);
                }
            }
        }
    }
}

/// Background refresher handle
struct PrimaryRefresher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Connections to every member of a cluster plus the current primary
pub struct ClusterConnection {
    state: Arc<ClusterState>,
    refresh_interval: Duration,
    refresher: Mutex<Option<PrimaryRefresher>>,
}

impl ClusterConnection {
    /// Cluster made of a single node; no refresher is started
    pub fn single(primary: Connection) -> Self {
        let primary = Arc::new(primary);
        Self {
            state: Arc::new(ClusterState {
                primary: RwLock::new(Arc::clone(&primary)),
                members: vec![primary],
            }),
            refresh_interval: DEFAULT_PRIMARY_REFRESH_INTERVAL,
            refresher: Mutex::new(None),
        }
    }

    /// Build a cluster connection and start the primary refresher when there
    /// are at least two members
    ///
    /// `members` is de-duplicated by host, keeping the first connection seen.
    /// Fails with `InvalidHostConfiguration` when `primary` is not one of the
    /// members, or when the refresher would start with a zero interval. Must
    /// be called inside a tokio runtime when more than one member is given.
    pub fn new<I>(
        primary: Connection,
        members: I,
        detector: Arc<dyn PrimaryDetector>,
        refresh_interval: Duration,
    ) -> HealthResult<Self>
    where
        I: IntoIterator<Item = Connection>,
    {
        let mut unique: Vec<Arc<Connection>> = Vec::new();
        for member in members {
            if !unique.iter().any(|known| **known == member) {
                unique.push(Arc::new(member));
            }
        }

        let primary = unique
            .iter()
            .find(|member| ***member == primary)
            .cloned()
            .ok_or_else(|| {
                HealthError::invalid_host(format!(
                    "cluster members have to contain the primary {}",
                    primary.host()
                ))
            })?;

        let cluster = Self {
            state: Arc::new(ClusterState {
                primary: RwLock::new(primary),
                members: unique,
            }),
            refresh_interval,
            refresher: Mutex::new(None),
        };

        if cluster.state.members.len() >= 2 {
            cluster.start_refresher(detector)?;
        } else {
            debug!("Single node. There's no point to monitor primary node.");
        }

        Ok(cluster)
    }

    fn start_refresher(&self, detector: Arc<dyn PrimaryDetector>) -> HealthResult<()> {
        if self.refresh_interval.is_zero() {
            return Err(HealthError::invalid_host(
                "primary refresh interval must be greater than zero",
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            HealthError::internal(format!("primary refresher needs a tokio runtime: {}", e))
        })?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = Arc::clone(&self.state);
        let period = self.refresh_interval;

        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = state.refresh_primary(detector.as_ref()) => {}
                        }
                    }
                }
            }
            debug!("Primary refresher stopped");
        });

        info!(
            "Monitoring primary across {} hosts every {:?}",
            self.state.members.len(),
            period
        );
        *self.refresher.lock() = Some(PrimaryRefresher { cancel, task });
        Ok(())
    }

    /// Last known primary; never blocks on the network
    pub fn current_primary(&self) -> Arc<Connection> {
        Arc::clone(&self.state.primary.read())
    }

    /// Every member of the cluster, fixed at construction
    pub fn all_members(&self) -> &[Arc<Connection>] {
        &self.state.members
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Whether the background refresher is running
    pub fn is_monitoring(&self) -> bool {
        self.refresher.lock().is_some()
    }

    /// Stop the refresher and release every member's handle
    ///
    /// An in-flight probe is abandoned rather than awaited. The cluster must
    /// not be used after this call.
    pub async fn shutdown(&self) {
        let refresher = self.refresher.lock().take();
        if let Some(refresher) = refresher {
            refresher.cancel.cancel();
            if let Err(e) = refresher.task.await {
                warn!("Primary refresher ended abnormally: {}", e);
            }
        }
        for member in &self.state.members {
            member.handle().close().await;
        }
        info!("Cluster connection closed");
    }
}

impl Drop for ClusterConnection {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.get_mut().take() {
            refresher.cancel.cancel();
        }
    }
}
