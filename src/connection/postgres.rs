//! `tokio-postgres` backed connection factory
//!
//! Handles connect lazily on the first query and reconnect once the client
//! reports itself closed, so a temporarily unreachable replica does not fail
//! cluster construction. The `socketTimeout` URL parameter bounds each query,
//! including a lazy connect.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::config::TargetSessionAttrs;
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use super::{url, ConnectionFactory, DatabaseHandle, Host, QueryParam, Row, Value};
use crate::error::{HealthResult, QueryError};

const APPLICATION_NAME: &str = "pghealth";

/// Factory producing `PgHandle`s
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(
        &self,
        url: &str,
        user: &str,
        password: &str,
    ) -> HealthResult<Arc<dyn DatabaseHandle>> {
        let handle = PgHandle::new(url, user, password)?;
        Ok(Arc::new(handle) as Arc<dyn DatabaseHandle>)
    }
}

/// Lazily connected handle to one PostgreSQL host
pub struct PgHandle {
    address: String,
    config: tokio_postgres::Config,
    query_timeout: Option<Duration>,
    client: Mutex<Option<Client>>,
}

impl PgHandle {
    pub fn new(pg_url: &str, user: &str, password: &str) -> HealthResult<Self> {
        let host = Host::of_url(pg_url)?;
        let database = url::extract_database_name(pg_url)?.trim_start_matches('/');

        let mut config = tokio_postgres::Config::new();
        config
            .host(host.name())
            .port(host.port())
            .dbname(database)
            .user(user)
            .password(password)
            .application_name(APPLICATION_NAME);

        let mut query_timeout = None;
        for (key, value) in url::query_parameters(pg_url) {
            match key {
                "connectTimeout" => {
                    if let Ok(seconds) = value.parse::<u64>() {
                        if seconds > 0 {
                            config.connect_timeout(Duration::from_secs(seconds));
                        }
                    }
                }
                url::TARGET_SERVER_TYPE if value == "primary" || value == "master" => {
                    config.target_session_attrs(TargetSessionAttrs::ReadWrite);
                }
                "socketTimeout" => {
                    query_timeout = value
                        .parse::<u64>()
                        .ok()
                        .filter(|seconds| *seconds > 0)
                        .map(Duration::from_secs);
                }
                "ApplicationName" => {
                    config.application_name(value);
                }
                _ => {}
            }
        }

        Ok(Self {
            address: host.address(),
            config,
            query_timeout,
            client: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &tokio_postgres::Config {
        &self.config
    }

    /// Upper bound for one query, `None` when unbounded
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    async fn connect(&self) -> Result<Client, QueryError> {
        debug!("Connecting to {}", self.address);
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| QueryError::Connection(e.to_string()))?;

        let address = self.address.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection to {} closed with error: {}", address, e);
            }
        });

        Ok(client)
    }

    async fn run(
        &self,
        guard: &mut Option<Client>,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Row>, QueryError> {
        if guard.as_ref().map_or(true, Client::is_closed) {
            *guard = Some(self.connect().await?);
        }
        let client = guard
            .as_ref()
            .ok_or_else(|| QueryError::Connection(format!("not connected to {}", self.address)))?;

        let bound: Vec<Box<dyn ToSql + Sync + Send>> = params
            .iter()
            .map(|param| match param {
                QueryParam::Text(value) => Box::new(value.clone()) as Box<dyn ToSql + Sync + Send>,
                QueryParam::Float(value) => Box::new(*value) as Box<dyn ToSql + Sync + Send>,
            })
            .collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|param| &**param as &(dyn ToSql + Sync))
            .collect();

        let rows = match client.query(sql, &refs).await {
            Ok(rows) => rows,
            Err(e) => {
                let closed = client.is_closed();
                if closed {
                    *guard = None;
                    return Err(QueryError::Connection(e.to_string()));
                }
                return Err(QueryError::Execution(e.to_string()));
            }
        };

        rows.iter().map(convert_row).collect()
    }
}

#[async_trait]
impl DatabaseHandle for PgHandle {
    async fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>, QueryError> {
        let mut guard = self.client.lock().await;
        let Some(limit) = self.query_timeout else {
            return self.run(&mut guard, sql, params).await;
        };
        let outcome = tokio::time::timeout(limit, self.run(&mut guard, sql, params)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // the abandoned request may still be in flight on this client
                *guard = None;
                warn!("Query on {} timed out after {:?}", self.address, limit);
                Err(QueryError::Timeout(limit))
            }
        }
    }

    async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            debug!("Closed connection to {}", self.address);
        }
    }
}

/// How a column is read into a `Value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Timestamp,
    TimestampTz,
    Date,
    Text,
    TextArray,
}

fn column_kind(ty: &Type) -> Option<ColumnKind> {
    let kind = if *ty == Type::BOOL {
        ColumnKind::Bool
    } else if *ty == Type::INT2 {
        ColumnKind::Int2
    } else if *ty == Type::INT4 {
        ColumnKind::Int4
    } else if *ty == Type::INT8 {
        ColumnKind::Int8
    } else if *ty == Type::OID {
        ColumnKind::Oid
    } else if *ty == Type::FLOAT4 {
        ColumnKind::Float4
    } else if *ty == Type::FLOAT8 {
        ColumnKind::Float8
    } else if *ty == Type::NUMERIC {
        ColumnKind::Numeric
    } else if *ty == Type::TIMESTAMP {
        ColumnKind::Timestamp
    } else if *ty == Type::TIMESTAMPTZ {
        ColumnKind::TimestampTz
    } else if *ty == Type::DATE {
        ColumnKind::Date
    } else if <String as FromSql>::accepts(ty) {
        ColumnKind::Text
    } else {
        match ty.kind() {
            Kind::Array(element) if <String as FromSql>::accepts(element) => ColumnKind::TextArray,
            _ => return None,
        }
    };
    Some(kind)
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, QueryError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let mapping_error = |message: String| QueryError::Mapping {
            column: column.name().to_string(),
            message,
        };
        let kind = column_kind(column.type_())
            .ok_or_else(|| mapping_error(format!("unsupported column type {}", column.type_())))?;
        let value = decode_value(row, index, kind).map_err(|e| mapping_error(e.to_string()))?;
        columns.push(column.name().to_string());
        values.push(value);
    }
    Ok(Row::new(columns, values))
}

fn decode_value(
    row: &tokio_postgres::Row,
    index: usize,
    kind: ColumnKind,
) -> Result<Value, tokio_postgres::Error> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(index)?.map(Value::Bool),
        ColumnKind::Int2 => row
            .try_get::<_, Option<i16>>(index)?
            .map(|v| Value::Int(i64::from(v))),
        ColumnKind::Int4 => row
            .try_get::<_, Option<i32>>(index)?
            .map(|v| Value::Int(i64::from(v))),
        ColumnKind::Int8 => row.try_get::<_, Option<i64>>(index)?.map(Value::Int),
        ColumnKind::Oid => row
            .try_get::<_, Option<u32>>(index)?
            .map(|v| Value::Int(i64::from(v))),
        ColumnKind::Float4 => row
            .try_get::<_, Option<f32>>(index)?
            .map(|v| Value::Float(f64::from(v))),
        ColumnKind::Float8 => row.try_get::<_, Option<f64>>(index)?.map(Value::Float),
        ColumnKind::Numeric => row
            .try_get::<_, Option<Numeric>>(index)?
            .map(|v| Value::Float(v.0)),
        ColumnKind::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map(|v| Value::Timestamp(v.and_utc())),
        ColumnKind::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(Value::Timestamp),
        ColumnKind::Date => row
            .try_get::<_, Option<NaiveDate>>(index)?
            .map(|v| Value::Text(v.to_string())),
        ColumnKind::Text => row.try_get::<_, Option<String>>(index)?.map(Value::Text),
        ColumnKind::TextArray => row
            .try_get::<_, Option<Vec<Option<String>>>>(index)?
            .map(|items| {
                Value::Array(
                    items
                        .into_iter()
                        .map(|item| item.map_or(Value::Null, Value::Text))
                        .collect(),
                )
            }),
    };
    Ok(value.unwrap_or(Value::Null))
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const NUMERIC_BASE: f64 = 10_000.0;

/// `numeric` read from its binary wire form
///
/// Sizes and percentages only need float precision, so the value is not kept
/// as an exact decimal.
struct Numeric(f64);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(Numeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

// Layout: ndigits, weight, sign, dscale as 16-bit words, then base-10000 digits.
fn decode_numeric(raw: &[u8]) -> Result<f64, Box<dyn StdError + Sync + Send>> {
    let word = |offset: usize| -> Result<u16, Box<dyn StdError + Sync + Send>> {
        raw.get(offset..offset + 2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .ok_or_else(|| "numeric value is truncated".into())
    };

    let digits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;

    let magnitude = match sign {
        NUMERIC_NAN => return Ok(f64::NAN),
        NUMERIC_PINF => return Ok(f64::INFINITY),
        NUMERIC_NINF => return Ok(f64::NEG_INFINITY),
        NUMERIC_POS | NUMERIC_NEG => {
            let mut total = 0.0;
            for position in 0..digits {
                let digit = f64::from(word(8 + position * 2)?);
                total += digit * NUMERIC_BASE.powi(weight - position as i32);
            }
            total
        }
        other => return Err(format!("invalid numeric sign {:#06x}", other).into()),
    };

    Ok(if sign == NUMERIC_NEG { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthError;

    #[test]
    fn test_config_from_url() {
        let handle = PgHandle::new(
            "jdbc:postgresql://db-1:6432/orders?connectTimeout=3&targetServerType=any",
            "monitor",
            "secret",
        )
        .unwrap();
        let config = handle.config();
        assert_eq!(config.get_dbname(), Some("orders"));
        assert_eq!(config.get_ports(), &[6432]);
        assert_eq!(config.get_user(), Some("monitor"));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(3)));
        assert_eq!(config.get_application_name(), Some(APPLICATION_NAME));
        assert_eq!(handle.query_timeout(), None);

        let bounded =
            PgHandle::new("pg://db-1:6432/orders?socketTimeout=600", "monitor", "secret").unwrap();
        assert_eq!(bounded.query_timeout(), Some(Duration::from_secs(600)));
        let unbounded =
            PgHandle::new("pg://db-1:6432/orders?socketTimeout=0", "monitor", "secret").unwrap();
        assert_eq!(unbounded.query_timeout(), None);
    }

    #[test]
    fn test_config_rejects_multi_host_url() {
        let result = PgHandle::new("pg://db-1:5432,db-2:5432/orders", "monitor", "secret");
        assert!(matches!(
            result,
            Err(HealthError::InvalidHostConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_factory_does_not_connect_eagerly() {
        let factory = PgConnectionFactory;
        let handle = factory
            .connect("pg://127.0.0.1:65535/orders", "monitor", "secret")
            .await;
        assert!(handle.is_ok());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut accepted = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                accepted.push(socket);
            }
        });

        let handle = PgHandle::new(
            &format!("pg://127.0.0.1:{}/orders?socketTimeout=1", port),
            "monitor",
            "secret",
        )
        .unwrap();
        let result = handle.query("select 1", &[]).await;
        match result {
            Err(QueryError::Timeout(limit)) => assert_eq!(limit, Duration::from_secs(1)),
            other => panic!("Expected Timeout, got {:?}", other.map(|rows| rows.len())),
        }
        server.abort();
    }

    #[test]
    fn test_column_kind_dispatch() {
        assert!(!<String as FromSql>::accepts(&Type::NUMERIC));
        assert_eq!(column_kind(&Type::NUMERIC), Some(ColumnKind::Numeric));
        assert_eq!(column_kind(&Type::TIMESTAMPTZ), Some(ColumnKind::TimestampTz));
        assert_eq!(column_kind(&Type::TIMESTAMP), Some(ColumnKind::Timestamp));
        assert_eq!(column_kind(&Type::INT8), Some(ColumnKind::Int8));
        assert_eq!(column_kind(&Type::OID), Some(ColumnKind::Oid));
        assert_eq!(column_kind(&Type::NAME), Some(ColumnKind::Text));
        assert_eq!(column_kind(&Type::VARCHAR), Some(ColumnKind::Text));
        assert_eq!(column_kind(&Type::TEXT_ARRAY), Some(ColumnKind::TextArray));
        assert_eq!(column_kind(&Type::NAME_ARRAY), Some(ColumnKind::TextArray));
        assert_eq!(column_kind(&Type::BYTEA), None);
        assert_eq!(column_kind(&Type::JSONB), None);
        assert_eq!(column_kind(&Type::INT4_ARRAY), None);
    }

    fn numeric_bytes(weight: i16, sign: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&0u16.to_be_bytes());
        for digit in digits {
            raw.extend_from_slice(&digit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        let close = |raw: Vec<u8>, expected: f64| {
            let value = decode_numeric(&raw).unwrap();
            assert!((value - expected).abs() < 1e-9, "{} != {}", value, expected);
        };
        // 12.5 is stored as [12, 5000] with weight 0
        close(numeric_bytes(0, NUMERIC_POS, &[12, 5000]), 12.5);
        close(numeric_bytes(1, NUMERIC_POS, &[123, 4567]), 1_234_567.0);
        close(numeric_bytes(-1, NUMERIC_NEG, &[42]), -0.0042);
        close(numeric_bytes(0, NUMERIC_POS, &[]), 0.0);

        assert!(decode_numeric(&numeric_bytes(0, NUMERIC_NAN, &[])).unwrap().is_nan());
        assert_eq!(
            decode_numeric(&numeric_bytes(0, NUMERIC_NINF, &[])).unwrap(),
            f64::NEG_INFINITY
        );

        let mut truncated = numeric_bytes(0, NUMERIC_POS, &[12, 5000]);
        truncated.truncate(10);
        assert!(decode_numeric(&truncated).is_err());
        assert!(decode_numeric(&numeric_bytes(0, 0x1234, &[1])).is_err());
    }
}
