/// Host and connection abstractions shared by the cluster and check engine
pub mod host;
pub mod postgres;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use host::Host;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{HealthError, HealthResult, QueryError};

/// A single column value returned by a database handle
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

// Floats compare by bit pattern so rows can be used as set members in merges.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(value) => value.hash(state),
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::Text(value) => value.hash(state),
            Value::Timestamp(value) => value.hash(state),
            Value::Array(values) => values.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Text(value) => write!(f, "{}", value),
            Value::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
            Value::Array(values) => {
                write!(f, "{{")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One result row: column names with their values, in select order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(column, value)| (column.into(), value))
            .unzip();
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|index| self.values.get(index))
    }

    /// Text value of a column, failing with a mapping error otherwise
    pub fn get_str(&self, column: &str) -> Result<&str, QueryError> {
        self.get(column)
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::Mapping {
                column: column.to_string(),
                message: "expected a text value".to_string(),
            })
    }

    /// Integer value of a column, failing with a mapping error otherwise
    pub fn get_i64(&self, column: &str) -> Result<i64, QueryError> {
        self.get(column)
            .and_then(Value::as_i64)
            .ok_or_else(|| QueryError::Mapping {
                column: column.to_string(),
                message: "expected an integer value".to_string(),
            })
    }

    /// Timestamp value of a column; `None` when it is SQL null
    pub fn get_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, QueryError> {
        match self.get(column) {
            Some(Value::Null) => Ok(None),
            Some(Value::Timestamp(value)) => Ok(Some(*value)),
            _ => Err(QueryError::Mapping {
                column: column.to_string(),
                message: "expected a timestamp value".to_string(),
            }),
        }
    }
}

/// Positional parameter bound to a diagnostic query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Float(f64),
}

/// Live handle to one database host, supplied by a `ConnectionFactory`
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Execute a read-only query with positional parameters
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>, QueryError>;

    /// Release the underlying resources
    async fn close(&self) {}
}

/// Produces live handles from `(url, user, password)`
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        user: &str,
        password: &str,
    ) -> HealthResult<Arc<dyn DatabaseHandle>>;
}

/// A host paired with its database handle
///
/// Two connections to the same host are interchangeable: equality and hashing
/// delegate to `Host`.
#[derive(Clone)]
pub struct Connection {
    host: Host,
    handle: Arc<dyn DatabaseHandle>,
}

impl Connection {
    pub fn new(host: Host, handle: Arc<dyn DatabaseHandle>) -> Self {
        Self { host, handle }
    }

    /// Build the host from `url` and open a handle through `factory`
    pub async fn open(
        url: &str,
        credentials: &ConnectionCredentials,
        factory: &dyn ConnectionFactory,
    ) -> HealthResult<Self> {
        let host = Host::of_url(url)?;
        let handle = factory
            .connect(url, credentials.user(), credentials.password())
            .await?;
        Ok(Self::new(host, handle))
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn handle(&self) -> &Arc<dyn DatabaseHandle> {
        &self.handle
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("host", &self.host).finish()
    }
}

/// Connection strings plus the account used for every host
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredentials {
    urls: BTreeSet<String>,
    user: String,
    password: String,
}

impl ConnectionCredentials {
    pub fn new<I, S>(urls: I, user: &str, password: &str) -> HealthResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: BTreeSet<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return Err(HealthError::invalid_argument("connection urls cannot be empty"));
        }
        for pg_url in &urls {
            url::extract_host_names(pg_url)?;
        }
        if user.trim().is_empty() {
            return Err(HealthError::invalid_argument("user name cannot be blank"));
        }
        if password.trim().is_empty() {
            return Err(HealthError::invalid_argument("password cannot be blank"));
        }
        Ok(Self {
            urls,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn of_url(url: &str, user: &str, password: &str) -> HealthResult<Self> {
        Self::new([url], user, password)
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("urls", &self.urls)
            .field("user", &self.user)
            .field("password", &"******")
            .finish()
    }
}
