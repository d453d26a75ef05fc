//! Error types for tenant operations with stable codes and HTTP mapping.
//!
//! Every failure the data plane can produce carries an [`ErrorCode`] that
//! renders as `T{category}{number}`:
//! - 1xxx: Tenant lifecycle (not found, already exists, disabled, provisioning)
//! - 2xxx: Connection pool (exhausted, connect failures, leaks)
//! - 3xxx: Authorization (cross-tenant access, credentials)
//! - 4xxx: Consistency (stale cache risk)
//! - 5xxx: Data access (not found, invalid input, query timeouts)
//! - 7xxx: Configuration
//! - 9xxx: Internal
//!
//! ```rust
//! use parish_core::{ErrorCode, TenantError};
//!
//! let err = TenantError::tenant_not_found("grace-chapel");
//! assert_eq!(err.code, ErrorCode::TenantNotFound);
//! assert_eq!(err.code.code(), "T1001");
//! assert_eq!(err.code.http_status(), 404);
//! ```
//!
//! Cross-tenant access and references to resources that do not exist share
//! one external status (403) so that responses never reveal whether another
//! tenant's resource exists. The distinction survives in the log line only.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for tenant operations.
pub type TenantResult<T> = Result<T, TenantError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Tenant lifecycle errors (1xxx)
    /// Tenant is not registered (T1001).
    TenantNotFound = 1001,
    /// Tenant id is already registered (T1002).
    TenantAlreadyExists = 1002,
    /// Tenant has been disabled by an administrator (T1003).
    TenantDisabled = 1003,
    /// Tenant is still being provisioned (T1004).
    TenantNotReady = 1004,
    /// Creating the tenant store failed (T1005).
    ProvisioningFailed = 1005,
    /// Tenant id is malformed (T1006).
    InvalidTenantId = 1006,

    // Pool errors (2xxx)
    /// No pool slot became available within the acquire timeout (T2001).
    PoolExhausted = 2001,
    /// Opening a tenant store failed (T2002).
    ConnectionFailed = 2002,
    /// Opening a tenant store timed out (T2003).
    ConnectionTimeout = 2003,
    /// A handle could not be closed and was abandoned (T2004).
    ConnectionLeakSuspected = 2004,
    /// The pool has been shut down (T2005).
    PoolClosed = 2005,

    // Authorization errors (3xxx)
    /// Principal does not own the requested resource (T3001).
    CrossTenantAccessDenied = 3001,
    /// Request carried no valid credential (T3002).
    Unauthenticated = 3002,
    /// Email or password did not match (T3003).
    InvalidCredentials = 3003,

    // Consistency errors (4xxx)
    /// Write committed but cache invalidation did not complete (T4001).
    StaleCacheRisk = 4001,
    /// Cache backend failure (T4002).
    CacheError = 4002,

    // Data errors (5xxx)
    /// Resource does not exist inside the caller's own tenant (T5001).
    ResourceNotFound = 5001,
    /// Request payload failed validation (T5002).
    InvalidInput = 5002,
    /// Write conflicts with existing data (T5003).
    Conflict = 5003,
    /// Query exceeded its timeout (T5004).
    QueryTimeout = 5004,
    /// General storage engine error (T5005).
    DatabaseError = 5005,

    // Configuration errors (7xxx)
    /// Configuration is invalid (T7001).
    InvalidConfiguration = 7001,

    // Internal errors (9xxx)
    /// Internal error (T9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1001").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get the machine-readable name used in API error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TenantNotFound => "TenantNotFound",
            Self::TenantAlreadyExists => "TenantAlreadyExists",
            Self::TenantDisabled => "TenantDisabled",
            Self::TenantNotReady => "TenantNotReady",
            Self::ProvisioningFailed => "ProvisioningFailed",
            Self::InvalidTenantId => "InvalidTenantId",
            Self::PoolExhausted => "PoolExhausted",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ConnectionTimeout => "ConnectionTimeout",
            Self::ConnectionLeakSuspected => "ConnectionLeakSuspected",
            Self::PoolClosed => "PoolClosed",
            Self::CrossTenantAccessDenied => "CrossTenantAccessDenied",
            Self::Unauthenticated => "Unauthenticated",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::StaleCacheRisk => "StaleCacheRisk",
            Self::CacheError => "CacheError",
            Self::ResourceNotFound => "ResourceNotFound",
            Self::InvalidInput => "InvalidInput",
            Self::Conflict => "Conflict",
            Self::QueryTimeout => "QueryTimeout",
            Self::DatabaseError => "DatabaseError",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::Internal => "Internal",
        }
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TenantNotFound => "Tenant not found",
            Self::TenantAlreadyExists => "Tenant already exists",
            Self::TenantDisabled => "Tenant disabled",
            Self::TenantNotReady => "Tenant is still provisioning",
            Self::ProvisioningFailed => "Tenant provisioning failed",
            Self::InvalidTenantId => "Invalid tenant id",
            Self::PoolExhausted => "Connection pool exhausted",
            Self::ConnectionFailed => "Tenant store connection failed",
            Self::ConnectionTimeout => "Tenant store connection timeout",
            Self::ConnectionLeakSuspected => "Connection leak suspected",
            Self::PoolClosed => "Connection pool closed",
            Self::CrossTenantAccessDenied => "Cross-tenant access denied",
            Self::Unauthenticated => "Authentication required",
            Self::InvalidCredentials => "Invalid credentials",
            Self::StaleCacheRisk => "Write committed but cache may be stale",
            Self::CacheError => "Cache error",
            Self::ResourceNotFound => "Resource not found",
            Self::InvalidInput => "Invalid input",
            Self::Conflict => "Conflict",
            Self::QueryTimeout => "Query timeout",
            Self::DatabaseError => "Database error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::Internal => "Internal error",
        }
    }

    /// Stable HTTP status for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TenantNotFound | Self::ResourceNotFound => 404,
            Self::TenantAlreadyExists | Self::Conflict => 409,
            Self::TenantDisabled | Self::CrossTenantAccessDenied => 403,
            Self::Unauthenticated | Self::InvalidCredentials => 401,
            Self::InvalidTenantId | Self::InvalidInput => 400,
            Self::TenantNotReady
            | Self::ProvisioningFailed
            | Self::PoolExhausted
            | Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::PoolClosed
            | Self::StaleCacheRisk => 503,
            Self::QueryTimeout => 504,
            Self::ConnectionLeakSuspected
            | Self::CacheError
            | Self::DatabaseError
            | Self::InvalidConfiguration
            | Self::Internal => 500,
        }
    }

    /// Whether a caller may retry the request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TenantNotReady
                | Self::ProvisioningFailed
                | Self::PoolExhausted
                | Self::ConnectionTimeout
                | Self::QueryTimeout
                | Self::StaleCacheRisk
        )
    }

    /// Suggested backoff before a retry.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::PoolExhausted | Self::ConnectionTimeout => Some(Duration::from_secs(1)),
            Self::TenantNotReady | Self::ProvisioningFailed => Some(Duration::from_secs(5)),
            Self::QueryTimeout | Self::StaleCacheRisk => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The tenant involved.
    pub tenant: Option<String>,
    /// The resource involved.
    pub resource: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors produced by the tenant data plane.
#[derive(Error, Debug)]
pub struct TenantError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl TenantError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Attach the tenant involved.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.context.tenant = Some(tenant.into());
        self
    }

    /// Attach the resource involved.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.context.resource = Some(resource.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Tenant is not registered.
    pub fn tenant_not_found(tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self::new(ErrorCode::TenantNotFound, format!("Tenant '{}' is not registered", tenant))
            .with_tenant(tenant)
    }

    /// Tenant id is already claimed.
    pub fn tenant_already_exists(tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self::new(
            ErrorCode::TenantAlreadyExists,
            format!("Tenant '{}' is already registered", tenant),
        )
        .with_tenant(tenant)
        .with_suggestion("Choose a different church id or log in to the existing account")
    }

    /// Tenant has been disabled.
    pub fn tenant_disabled(tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self::new(ErrorCode::TenantDisabled, format!("Tenant '{}' is disabled", tenant))
            .with_tenant(tenant)
    }

    /// Tenant is registered but its store is not ready yet.
    pub fn tenant_not_ready(tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self::new(
            ErrorCode::TenantNotReady,
            format!("Tenant '{}' is still being provisioned", tenant),
        )
        .with_tenant(tenant)
        .with_suggestion("Retry once registration has completed")
    }

    /// Provisioning failed and the reservation was rolled back.
    pub fn provisioning_failed(tenant: impl Into<String>, message: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self::new(
            ErrorCode::ProvisioningFailed,
            format!("Provisioning tenant '{}' failed: {}", tenant, message.into()),
        )
        .with_tenant(tenant)
        .with_help("No locator was recorded; the registration can be retried")
    }

    /// Tenant id failed validation.
    pub fn invalid_tenant_id(tenant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidTenantId,
            format!("Invalid tenant id '{}': {}", tenant.into(), reason.into()),
        )
        .with_suggestion("Tenant ids may contain letters, digits, '-' and '_' (1 to 64 characters)")
    }

    /// No slot became available within the acquire timeout.
    pub fn pool_exhausted(capacity: usize, waited: Duration) -> Self {
        Self::new(
            ErrorCode::PoolExhausted,
            format!(
                "Connection pool exhausted ({} handles in use, waited {}ms)",
                capacity,
                waited.as_millis()
            ),
        )
        .with_suggestion("Retry with backoff")
        .with_suggestion("Increase pool.capacity if this happens under normal load")
    }

    /// Opening a tenant store failed.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConnectionFailed,
            format!("Connection error: {}", message.into()),
        )
    }

    /// Opening a tenant store timed out.
    pub fn connection_timeout(duration: Duration) -> Self {
        Self::new(
            ErrorCode::ConnectionTimeout,
            format!("Connection timed out after {}ms", duration.as_millis()),
        )
        .with_suggestion("Increase pool.connect_timeout")
    }

    /// A close exceeded the disconnect timeout and the handle was abandoned.
    pub fn leak_suspected(tenant: impl Into<String>, timeout: Duration) -> Self {
        let tenant = tenant.into();
        Self::new(
            ErrorCode::ConnectionLeakSuspected,
            format!(
                "Closing a handle for tenant '{}' exceeded {}ms; handle abandoned",
                tenant,
                timeout.as_millis()
            ),
        )
        .with_tenant(tenant)
    }

    /// The pool no longer hands out handles.
    pub fn pool_closed() -> Self {
        Self::new(ErrorCode::PoolClosed, "Connection pool has been shut down")
    }

    /// Principal may not touch the resource.
    pub fn cross_tenant(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CrossTenantAccessDenied,
            "Access denied: resource does not belong to your church",
        )
        .with_resource(resource)
    }

    /// Missing or invalid bearer credential.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    /// Login failed.
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "Invalid email or password")
    }

    /// Write committed, invalidation did not.
    pub fn stale_cache_risk(scope: impl Into<String>, attempts: u32) -> Self {
        Self::new(
            ErrorCode::StaleCacheRisk,
            format!(
                "Write to {} committed but cache invalidation failed after {} attempts",
                scope.into(),
                attempts
            ),
        )
        .with_help("The write is durable; reads may be stale until the cache entry expires")
    }

    /// Store stopped responding mid-write; the write may or may not land.
    pub fn commit_uncertain(scope: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::StaleCacheRisk,
            format!(
                "Write to {} may have committed after the store stopped responding",
                scope.into()
            ),
        )
        .with_help("Reload before retrying; cached pages are refreshed once the store settles")
    }

    /// Cache backend failure.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }

    /// Resource absent from the caller's own store.
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorCode::ResourceNotFound, format!("{} not found", resource))
            .with_resource(resource)
    }

    /// Payload failed validation.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("Invalid input for {}: {}", field.into(), message.into()),
        )
    }

    /// Write conflicts with existing data.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Query exceeded its timeout.
    pub fn query_timeout(duration: Duration) -> Self {
        Self::new(
            ErrorCode::QueryTimeout,
            format!("Query timed out after {}ms", duration.as_millis()),
        )
    }

    /// Storage engine error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message.into()))
    }

    // ============== Error Checks ==============

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::QueryTimeout | ErrorCode::ConnectionTimeout)
    }

    /// Whether a failed write may still have reached the store.
    ///
    /// Validation, conflict and access errors are raised before anything is
    /// written; everything else leaves the outcome unknown.
    pub fn may_have_committed(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::QueryTimeout
                | ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::DatabaseError
                | ErrorCode::Internal
        )
    }

    /// Check if this denies access across tenants.
    pub fn is_access_denied(&self) -> bool {
        self.code == ErrorCode::CrossTenantAccessDenied
    }

    /// Stable HTTP status.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Display the full error with context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  -> While: {}\n", op));
        }
        if let Some(ref tenant) = self.context.tenant {
            output.push_str(&format!("  -> Tenant: {}\n", tenant));
        }
        if let Some(ref resource) = self.context.resource {
            output.push_str(&format!("  -> Resource: {}\n", resource));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::TenantNotFound.code(), "T1001");
        assert_eq!(ErrorCode::PoolExhausted.code(), "T2001");
        assert_eq!(ErrorCode::CrossTenantAccessDenied.code(), "T3001");
        assert_eq!(ErrorCode::StaleCacheRisk.code(), "T4001");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(TenantError::tenant_not_found("a").http_status(), 404);
        assert_eq!(TenantError::tenant_already_exists("a").http_status(), 409);
        assert_eq!(TenantError::tenant_disabled("a").http_status(), 403);
        assert_eq!(TenantError::cross_tenant("grp.x.1").http_status(), 403);
        assert_eq!(
            TenantError::pool_exhausted(4, Duration::from_millis(10)).http_status(),
            503
        );
        assert_eq!(TenantError::invalid_credentials().http_status(), 401);
        assert_eq!(TenantError::stale_cache_risk("a/members", 3).http_status(), 503);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(TenantError::pool_exhausted(1, Duration::ZERO).is_retryable());
        assert!(TenantError::provisioning_failed("a", "disk full").is_retryable());
        assert!(TenantError::tenant_not_ready("a").is_retryable());
        assert!(!TenantError::cross_tenant("x").is_retryable());
        assert!(!TenantError::tenant_not_found("a").is_retryable());
    }

    #[test]
    fn test_failed_write_outcome() {
        assert!(TenantError::query_timeout(Duration::from_secs(1)).may_have_committed());
        assert!(TenantError::database("disk I/O error").may_have_committed());
        assert!(!TenantError::conflict("duplicate phone").may_have_committed());
        assert!(!TenantError::invalid_input("phone", "too short").may_have_committed());
        assert!(!TenantError::cross_tenant("grp.x.1").may_have_committed());
        assert_eq!(
            TenantError::commit_uncertain("a/members").code,
            ErrorCode::StaleCacheRisk
        );
    }

    #[test]
    fn test_retry_after_only_for_retryable() {
        assert!(ErrorCode::PoolExhausted.retry_after().is_some());
        assert!(ErrorCode::CrossTenantAccessDenied.retry_after().is_none());
    }

    #[test]
    fn test_display() {
        let err = TenantError::tenant_disabled("grace");
        assert_eq!(err.to_string(), "[T1003] Tenant 'grace' is disabled");
    }

    #[test]
    fn test_display_full() {
        let err = TenantError::tenant_already_exists("grace").with_context("registering church");
        let output = err.display_full();
        assert!(output.contains("T1002"));
        assert!(output.contains("registering church"));
        assert!(output.contains("Suggestions"));
    }

    #[test]
    fn test_cross_tenant_message_is_uniform() {
        let a = TenantError::cross_tenant("grp.other.1");
        let b = TenantError::cross_tenant("grp.mine.2");
        assert_eq!(a.message, b.message);
        assert!(a.is_access_denied());
    }
}
