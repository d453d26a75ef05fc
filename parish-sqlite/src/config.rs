//! SQLite store options.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SqliteError, SqliteResult};

/// SQLite synchronous mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynchronousMode {
    /// Synchronous OFF - Fastest but unsafe.
    Off,
    /// Synchronous NORMAL - Good balance.
    #[default]
    Normal,
    /// Synchronous FULL - Every commit reaches disk before returning.
    Full,
}

impl SynchronousMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JournalMode {
    /// DELETE - Rollback journal, removed after each transaction.
    Delete,
    /// WAL - Write-Ahead Logging.
    #[default]
    Wal,
    /// MEMORY - Journal kept in memory.
    Memory,
}

impl JournalMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Wal => "WAL",
            Self::Memory => "MEMORY",
        }
    }
}

/// Options applied to every store a connection is opened on.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Synchronous mode.
    pub synchronous: SynchronousMode,
    /// Journal mode.
    pub journal_mode: JournalMode,
    /// Longest a single store call may take.
    pub query_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            synchronous: SynchronousMode::Normal,
            journal_mode: JournalMode::Wal,
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreOptions {
    /// Options for the registry: every commit is durable before returning.
    pub fn registry() -> Self {
        Self {
            synchronous: SynchronousMode::Full,
            ..Default::default()
        }
    }

    /// Set the query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the synchronous mode.
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Generate the initialization SQL.
    pub fn init_sql(&self) -> String {
        format!(
            "PRAGMA foreign_keys = ON;\n\
             PRAGMA journal_mode = {};\n\
             PRAGMA synchronous = {};\n\
             PRAGMA busy_timeout = {};\n",
            self.journal_mode.as_pragma(),
            self.synchronous.as_pragma(),
            self.busy_timeout_ms,
        )
    }
}

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabasePath {
    /// In-memory database.
    Memory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Parse a SQLite URL.
    ///
    /// Supported formats:
    /// - `sqlite::memory:` or `:memory:` - In-memory database
    /// - `sqlite://path/to/db.sqlite3` - Relative path
    /// - `sqlite:///absolute/path/db.sqlite3` - Absolute path
    /// - `sqlite:path` or `file:path` - Alternative forms
    /// - anything else is taken as a plain path
    pub fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        let url = url.as_ref().trim();
        if url == "sqlite::memory:" || url == ":memory:" {
            return Ok(Self::Memory);
        }

        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .or_else(|| url.strip_prefix("file:"))
            .unwrap_or(url);
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() {
            return Err(SqliteError::config("database path is required"));
        }
        if path == ":memory:" {
            return Ok(Self::Memory);
        }
        Ok(Self::File(PathBuf::from(path)))
    }

    /// File path, if any.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::File(path) => Some(path),
        }
    }

    /// Check if this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_memory() {
        assert!(DatabasePath::from_url("sqlite::memory:").unwrap().is_memory());
        assert!(DatabasePath::from_url(":memory:").unwrap().is_memory());
    }

    #[test]
    fn test_from_url_file() {
        let path = DatabasePath::from_url("sqlite://./registry.sqlite3").unwrap();
        assert_eq!(path.as_path(), Some(Path::new("./registry.sqlite3")));

        let path = DatabasePath::from_url("sqlite:///var/lib/parish/registry.sqlite3?mode=rwc")
            .unwrap();
        assert_eq!(
            path.as_path(),
            Some(Path::new("/var/lib/parish/registry.sqlite3"))
        );

        let path = DatabasePath::from_url("plain.sqlite3").unwrap();
        assert_eq!(path.as_path(), Some(Path::new("plain.sqlite3")));
    }

    #[test]
    fn test_from_url_empty() {
        assert!(DatabasePath::from_url("sqlite://").is_err());
    }

    #[test]
    fn test_registry_options_are_durable() {
        let sql = StoreOptions::registry().init_sql();
        assert!(sql.contains("synchronous = FULL"));
        assert!(sql.contains("foreign_keys = ON"));
        assert!(sql.contains("journal_mode = WAL"));
    }
}
