//! Scripted database handles shared by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Connection, ConnectionFactory, DatabaseHandle, Host, QueryParam, Row, Value};
use crate::error::{HealthResult, QueryError};
use crate::health::PRIMARY_PROBE_QUERY;

/// Handle answering the primary probe from a flag and any other query from canned rows
///
/// Rows registered with `respond` take precedence for their exact SQL text.
#[derive(Default)]
pub struct MockHandle {
    primary: AtomicBool,
    fail_probes: AtomicBool,
    fail_queries: AtomicBool,
    closed: AtomicBool,
    probe_calls: AtomicUsize,
    query_calls: AtomicUsize,
    rows: Mutex<Vec<Row>>,
    responses: Mutex<HashMap<String, Vec<Row>>>,
    executed: Mutex<Vec<String>>,
    last_params: Mutex<Vec<QueryParam>>,
}

impl MockHandle {
    pub fn new(primary: bool) -> Arc<Self> {
        let handle = Self::default();
        handle.primary.store(primary, Ordering::SeqCst);
        Arc::new(handle)
    }

    pub fn with_rows(primary: bool, rows: Vec<Row>) -> Arc<Self> {
        let handle = Self::new(primary);
        *handle.rows.lock() = rows;
        handle
    }

    pub fn respond(&self, sql: &str, rows: Vec<Row>) {
        self.responses.lock().insert(sql.to_string(), rows);
    }

    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }

    pub fn set_fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Vec<QueryParam> {
        self.last_params.lock().clone()
    }

    /// Every non-probe query in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl DatabaseHandle for MockHandle {
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>, QueryError> {
        if sql == PRIMARY_PROBE_QUERY {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_probes.load(Ordering::SeqCst) {
                return Err(QueryError::Connection("connection refused".to_string()));
            }
            let primary = self.primary.load(Ordering::SeqCst);
            return Ok(vec![Row::from_pairs([("is_primary", Value::Bool(primary))])]);
        }

        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(sql.to_string());
        *self.last_params.lock() = params.to_vec();
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(QueryError::Execution("relation does not exist".to_string()));
        }
        if let Some(rows) = self.responses.lock().get(sql) {
            return Ok(rows.clone());
        }
        Ok(self.rows.lock().clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connection to `url` backed by a fresh mock handle
pub fn connection(url: &str, primary: bool) -> Connection {
    connection_with(url, MockHandle::new(primary))
}

pub fn connection_with(url: &str, handle: Arc<MockHandle>) -> Connection {
    let host = Host::of_url(url).expect("valid test url");
    Connection::new(host, handle)
}

/// Factory handing out mock handles; hosts listed in `primaries` answer the probe with true
#[derive(Default)]
pub struct MockConnectionFactory {
    primaries: Vec<String>,
    connected: Mutex<Vec<String>>,
    handles: Mutex<HashMap<String, Arc<MockHandle>>>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(address: &str) -> Self {
        Self {
            primaries: vec![address.to_string()],
            ..Self::default()
        }
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.connected.lock().clone()
    }

    pub fn handle(&self, address: &str) -> Option<Arc<MockHandle>> {
        self.handles.lock().get(address).cloned()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(
        &self,
        url: &str,
        _user: &str,
        _password: &str,
    ) -> HealthResult<Arc<dyn DatabaseHandle>> {
        let address = Host::of_url(url)?.address();
        let handle = MockHandle::new(self.primaries.contains(&address));
        self.connected.lock().push(url.to_string());
        self.handles.lock().insert(address, handle.clone());
        Ok(handle as Arc<dyn DatabaseHandle>)
    }
}
