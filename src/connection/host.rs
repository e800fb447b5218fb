//! Identity of a single cluster member

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::url;
use crate::error::{HealthError, HealthResult};

/// One member of a PostgreSQL cluster
///
/// Equality, hashing and ordering use `(name, port)` only. The URL and the
/// `may_be_primary` flag are derived from the connection string the host was
/// parsed from.
#[derive(Debug, Clone)]
pub struct Host {
    name: String,
    port: u16,
    url: String,
    may_be_primary: bool,
}

impl Host {
    pub fn new<N, U>(name: N, port: u32, url: U, may_be_primary: bool) -> HealthResult<Self>
    where
        N: Into<String>,
        U: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HealthError::invalid_host("host name cannot be blank"));
        }
        let port = url::validate_port(port)?;
        let url = url.into();
        url::scheme_of(&url)?;
        Ok(Self {
            name,
            port,
            url,
            may_be_primary,
        })
    }

    /// Build a host from a single-host connection string
    pub fn of_url(pg_url: &str) -> HealthResult<Self> {
        let mut hosts = url::extract_host_names(pg_url)?;
        if hosts.len() > 1 {
            return Err(HealthError::invalid_host(format!(
                "'{}' contains multiple hosts",
                pg_url
            )));
        }
        let (name, port) = hosts
            .pop()
            .ok_or_else(|| HealthError::malformed(format!("no hosts found in '{}'", pg_url)))?;
        Self::new(name, u32::from(port), pg_url, !url::is_replica_url(pg_url))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this host can ever be primary according to its URL
    pub fn may_be_primary(&self) -> bool {
        self.may_be_primary
    }

    /// `name:port` form used in logs and error messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.name == other.name
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.port.hash(state);
    }
}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}
