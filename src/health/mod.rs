//! Primary detection for cluster members
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;

use crate::connection::{Connection, Value};
use crate::error::{HealthError, HealthResult};

/// Liveness probe answering whether the node accepts writes
pub const PRIMARY_PROBE_QUERY: &str = "select not pg_is_in_recovery()";

/// Default upper bound for a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Primary detector trait
///
/// Implementations never retry: a failed probe is reported as
/// `HealthError::ProbeFailed` and the caller decides what to do with it.
#[async_trait]
pub trait PrimaryDetector: Send + Sync {
    /// Whether the host behind `connection` is currently primary
    async fn is_primary(&self, connection: &Connection) -> HealthResult<bool>;
}

/// Detector issuing `PRIMARY_PROBE_QUERY` through the connection's handle
pub struct PgPrimaryDetector {
    probe_timeout: Duration,
}

impl PgPrimaryDetector {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }
}

impl Default for PgPrimaryDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryDetector for PgPrimaryDetector {
    async fn is_primary(&self, connection: &Connection) -> HealthResult<bool> {
        let host = connection.host();
        if !host.may_be_primary() {
            return Ok(false);
        }

        tracing::debug!("Probing {} for primary role", host);
        let probe = connection.handle().query(PRIMARY_PROBE_QUERY, &[]);
        let rows = match timeout(self.probe_timeout, probe).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(HealthError::probe_failed(host.address(), e.to_string())),
            Err(_) => {
                return Err(HealthError::probe_failed(
                    host.address(),
                    format!("no answer within {:?}", self.probe_timeout),
                ))
            }
        };

        rows.first()
            .and_then(|row| row.value(0))
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                HealthError::probe_failed(host.address(), "probe returned no boolean value")
            })
    }
}
