/// Check execution: per-host queries, cluster dispatch and merging
pub mod cluster;
pub mod management;
pub mod merge;
pub mod report;

pub use cluster::{CheckOnCluster, MergeFn};
pub use management::DatabaseManagement;
pub use merge::MergeStrategies;
pub use report::{DatabaseChecks, HealthReport};

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::connection::{Connection, QueryParam, Row};
use crate::diagnostic::{Diagnostic, QueryParams};
use crate::error::{HealthError, HealthResult, QueryError};

pub const DEFAULT_SCHEMA_NAME: &str = "public";
pub const DEFAULT_BLOAT_PERCENTAGE_THRESHOLD: i32 = 10;
pub const DEFAULT_REMAINING_PERCENTAGE_THRESHOLD: f64 = 10.0;

/// Schema and thresholds threaded through every rule execution
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContext {
    schema_name: String,
    bloat_percentage_threshold: i32,
    remaining_percentage_threshold: f64,
}

impl SchemaContext {
    pub fn new(
        schema_name: &str,
        bloat_percentage_threshold: i32,
        remaining_percentage_threshold: f64,
    ) -> HealthResult<Self> {
        if schema_name.trim().is_empty() {
            return Err(HealthError::invalid_argument("schema name cannot be blank"));
        }
        if bloat_percentage_threshold < 0 {
            return Err(HealthError::invalid_argument(
                "bloat percentage threshold cannot be less than zero",
            ));
        }
        if !(0.0..=100.0).contains(&remaining_percentage_threshold) {
            return Err(HealthError::invalid_argument(
                "remaining percentage threshold should be in the range from 0.0 to 100.0",
            ));
        }
        Ok(Self {
            schema_name: schema_name.trim().to_lowercase(),
            bloat_percentage_threshold,
            remaining_percentage_threshold,
        })
    }

    /// Context for `schema_name` with default thresholds
    pub fn of(schema_name: &str) -> HealthResult<Self> {
        Self::new(
            schema_name,
            DEFAULT_BLOAT_PERCENTAGE_THRESHOLD,
            DEFAULT_REMAINING_PERCENTAGE_THRESHOLD,
        )
    }

    pub fn public() -> Self {
        Self {
            schema_name: DEFAULT_SCHEMA_NAME.to_string(),
            bloat_percentage_threshold: DEFAULT_BLOAT_PERCENTAGE_THRESHOLD,
            remaining_percentage_threshold: DEFAULT_REMAINING_PERCENTAGE_THRESHOLD,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn bloat_percentage_threshold(&self) -> i32 {
        self.bloat_percentage_threshold
    }

    pub fn remaining_percentage_threshold(&self) -> f64 {
        self.remaining_percentage_threshold
    }

    pub fn is_default_schema(&self) -> bool {
        self.schema_name == DEFAULT_SCHEMA_NAME
    }

    /// Qualify an object name with the schema unless it already is, or the schema is `public`
    pub fn enrich_with_schema(&self, object_name: &str) -> HealthResult<String> {
        if object_name.trim().is_empty() {
            return Err(HealthError::invalid_argument("object name cannot be blank"));
        }
        if self.is_default_schema() {
            return Ok(object_name.to_string());
        }
        let prefix = format!("{}.", self.schema_name);
        if object_name.to_lowercase().starts_with(&prefix) {
            return Ok(object_name.to_string());
        }
        Ok(format!("{}{}", prefix, object_name))
    }

    /// Positional parameters for a rule query
    pub fn query_params(&self, shape: QueryParams) -> Vec<QueryParam> {
        let schema = QueryParam::Text(self.schema_name.clone());
        match shape {
            QueryParams::Schema => vec![schema],
            QueryParams::SchemaWithBloatThreshold => vec![
                schema,
                QueryParam::Float(f64::from(self.bloat_percentage_threshold)),
            ],
            QueryParams::SchemaWithRemainingPercentageThreshold => vec![
                schema,
                QueryParam::Float(self.remaining_percentage_threshold),
            ],
        }
    }
}

impl Default for SchemaContext {
    fn default() -> Self {
        Self::public()
    }
}

impl fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (bloat {}%, remaining {}%)",
            self.schema_name, self.bloat_percentage_threshold, self.remaining_percentage_threshold
        )
    }
}

/// Maps one result row to a rule-specific record
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, QueryError>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, QueryError> {
        Ok(row.clone())
    }
}

/// Store of rule queries, addressed by resource name
pub trait QuerySource: Send + Sync {
    fn load(&self, resource: &str) -> HealthResult<String>;
}

/// Reads `<resource>` files from a directory
#[derive(Debug, Clone)]
pub struct DirectoryQuerySource {
    root: PathBuf,
}

impl DirectoryQuerySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl QuerySource for DirectoryQuerySource {
    fn load(&self, resource: &str) -> HealthResult<String> {
        let path = self.root.join(resource);
        match std::fs::read_to_string(&path) {
            Ok(sql) if !sql.trim().is_empty() => Ok(sql),
            _ => Err(HealthError::QueryResourceNotFound {
                name: path.display().to_string(),
            }),
        }
    }
}

/// In-memory query store
#[derive(Debug, Clone, Default)]
pub struct StaticQuerySource {
    queries: HashMap<String, String>,
}

impl StaticQuerySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query<R: Into<String>, Q: Into<String>>(mut self, resource: R, sql: Q) -> Self {
        self.queries.insert(resource.into(), sql.into());
        self
    }

    /// Same query text for every registered rule
    pub fn uniform(sql: &str) -> Self {
        Diagnostic::all().fold(Self::new(), |source, diagnostic| {
            source.with_query(diagnostic.query_resource(), sql)
        })
    }
}

impl QuerySource for StaticQuerySource {
    fn load(&self, resource: &str) -> HealthResult<String> {
        self.queries
            .get(resource)
            .cloned()
            .ok_or_else(|| HealthError::QueryResourceNotFound {
                name: resource.to_string(),
            })
    }
}

/// One rule bound to one host
///
/// The query text is loaded once at construction and reused for every run.
pub struct CheckOnHost<T> {
    diagnostic: Diagnostic,
    connection: Arc<Connection>,
    sql: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: FromRow> CheckOnHost<T> {
    pub fn new(
        connection: Arc<Connection>,
        diagnostic: Diagnostic,
        queries: &dyn QuerySource,
    ) -> HealthResult<Self> {
        let sql = queries.load(diagnostic.query_resource())?;
        Ok(Self {
            diagnostic,
            connection,
            sql,
            _record: PhantomData,
        })
    }

    pub fn diagnostic(&self) -> Diagnostic {
        self.diagnostic
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Run the query and map every row
    pub async fn execute(&self, ctx: &SchemaContext) -> Result<Vec<T>, QueryError> {
        let params = ctx.query_params(self.diagnostic.params());
        let rows = self.connection.handle().query(&self.sql, &params).await?;
        rows.iter().map(T::from_row).collect()
    }

    /// Run the query and keep the records accepted by `filter`
    pub async fn check<F>(&self, ctx: &SchemaContext, filter: F) -> HealthResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        let records = self.execute(ctx).await?;
        Ok(records.into_iter().filter(|record| filter(record)).collect())
    }
}
