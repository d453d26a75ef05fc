//! Error types for SQLite operations.

use std::time::Duration;

use parish_core::error::TenantError;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Error, Debug)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening a store failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement exceeded its timeout. The handle must not be reused.
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// The store's schema or tag is not what was expected.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Whether this is a uniqueness or foreign key violation.
    pub fn is_constraint_violation(&self) -> bool {
        let inner = match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(e)) => e,
            _ => return false,
        };
        matches!(
            inner.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        )
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for TenantError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Timeout(duration) => TenantError::query_timeout(duration),
            SqliteError::Connection(ref msg) => {
                TenantError::connection(msg.clone()).with_source(err)
            }
            SqliteError::Config(ref msg) => TenantError::config(msg.clone()),
            ref e if e.is_constraint_violation() => {
                TenantError::conflict("write conflicts with existing data").with_source(err)
            }
            other => TenantError::database(other.to_string()).with_source(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parish_core::ErrorCode;

    #[test]
    fn test_error_display() {
        let err = SqliteError::config("invalid path");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("invalid path"));
    }

    #[test]
    fn test_timeout_maps_to_query_timeout() {
        let err: TenantError = SqliteError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(err.code, ErrorCode::QueryTimeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let raw = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();

        let err = SqliteError::from(raw);
        assert!(err.is_constraint_violation());
        let tenant_err: TenantError = err.into();
        assert_eq!(tenant_err.code, ErrorCode::Conflict);
    }

    #[test]
    fn test_connection_maps_to_connection_failed() {
        let err: TenantError = SqliteError::connection("no such file").into();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }
}
