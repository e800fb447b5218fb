//! Unified error handling for pghealth
//!
//! Every fallible operation in the crate returns `HealthError`. Startup failures
//! (malformed connection strings, invalid host sets, rules without a merge
//! strategy) are fatal and surfaced immediately; probe failures are absorbed by
//! the primary refresher; rule failures are reported to the caller in aggregate.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// Main error type for pghealth operations
#[derive(Debug, Error)]
pub enum HealthError {
    /// Connection string does not match the expected scheme/host layout
    #[error("Malformed connection string: {message}")]
    MalformedConnectionString { message: String },

    /// Host or host set cannot form a valid cluster
    #[error("Invalid host configuration: {message}")]
    InvalidHostConfiguration { message: String },

    /// A single primary detection probe failed
    #[error("Primary probe failed for host {host}: {reason}")]
    ProbeFailed { host: String, reason: String },

    /// Whole-cluster diagnostic registered without a merge function
    #[error("Diagnostic {diagnostic} runs across the cluster but has no merge strategy")]
    MissingMergeStrategy { diagnostic: Diagnostic },

    /// A diagnostic query failed on one or more hosts
    #[error("Diagnostic {diagnostic} failed on {}", describe_failures(.failures))]
    RuleExecutionFailed {
        diagnostic: Diagnostic,
        failures: Vec<HostFailure>,
    },

    /// None of the cluster members reported itself as primary
    #[error("No primary host found among [{hosts}]")]
    PrimaryNotFound { hosts: String },

    /// The external query store has no resource with this name
    #[error("Query resource not found: {name}")]
    QueryResourceNotFound { name: String },

    /// Invalid argument passed to a constructor
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Errors reported by a database handle
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failure of one host while executing a diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct HostFailure {
    pub host: String,
    pub reason: String,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.host, self.reason)
    }
}

fn describe_failures(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by a `DatabaseHandle`
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Cannot map column {column}: {message}")]
    Mapping { column: String, message: String },

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for pghealth operations
pub type HealthResult<T> = Result<T, HealthError>;

/// Convenience methods for creating specific error types
impl HealthError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        HealthError::MalformedConnectionString {
            message: message.into(),
        }
    }

    pub fn invalid_host<S: Into<String>>(message: S) -> Self {
        HealthError::InvalidHostConfiguration {
            message: message.into(),
        }
    }

    pub fn probe_failed<H: Into<String>, R: Into<String>>(host: H, reason: R) -> Self {
        HealthError::ProbeFailed {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        HealthError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        HealthError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is transient (the same call may succeed later)
    pub fn is_recoverable(&self) -> bool {
        match self {
            HealthError::ProbeFailed { .. } => true,
            HealthError::PrimaryNotFound { .. } => true,
            HealthError::Query(QueryError::Connection(_)) => true,
            HealthError::Query(QueryError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HealthError::MalformedConnectionString { .. } => ErrorSeverity::Critical,
            HealthError::InvalidHostConfiguration { .. } => ErrorSeverity::Critical,
            HealthError::MissingMergeStrategy { .. } => ErrorSeverity::Critical,
            HealthError::Config(_) => ErrorSeverity::Critical,
            HealthError::Internal { .. } => ErrorSeverity::Critical,
            HealthError::ProbeFailed { .. } => ErrorSeverity::Warning,
            HealthError::PrimaryNotFound { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and exit reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Startup or wiring errors that need operator attention
    Critical,
    /// Errors that fail the current operation
    Error,
    /// Transient problems that may resolve on their own
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
        }
    }
}
