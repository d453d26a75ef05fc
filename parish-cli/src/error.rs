//! CLI error types and result alias.

use miette::Diagnostic;
use parish_core::error::TenantError;
use parish_sqlite::SqliteError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(parish::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(parish::config))]
    Config(String),

    /// Error reported by the tenant layer
    #[error("{0}")]
    #[diagnostic(code(parish::tenant))]
    Tenant(#[from] TenantError),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(parish::command))]
    Command(String),
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}

impl From<SqliteError> for CliError {
    fn from(err: SqliteError) -> Self {
        CliError::Tenant(err.into())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Command(format!("Failed to serialize JSON: {}", err))
    }
}

impl CliError {
    /// Suggestions carried by a tenant error.
    pub fn suggestions(&self) -> &[String] {
        match self {
            CliError::Tenant(e) => &e.context.suggestions,
            _ => &[],
        }
    }
}
