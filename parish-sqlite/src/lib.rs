//! # parish-sqlite
//!
//! SQLite storage for Parish: the tenant registry, one store file per tenant,
//! and the connector the pool uses to open them.
//!
//! ## Features
//!
//! - Durable registry (`synchronous = FULL`) holding tenant metadata only
//! - One tagged SQLite file per tenant, created by [`SqliteProvisioner`]
//! - Owner-checked connections through [`SqliteConnector`]
//! - Per-call query timeouts on [`SqliteHandle`]
//! - Branch, group and member operations, including transactional CSV import
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parish_core::tenant::{PoolConfig, TenantPoolManager};
//! use parish_sqlite::{SqliteConnector, SqliteRegistry, StoreOptions};
//!
//! let registry = Arc::new(SqliteRegistry::open("sqlite://parish-registry.sqlite3").await?);
//! let pool = TenantPoolManager::new(
//!     SqliteConnector::new(StoreOptions::default()),
//!     PoolConfig::default(),
//! );
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod handle;
pub mod provision;
pub mod registry;
pub mod schema;
pub mod store;

pub use config::{DatabasePath, JournalMode, StoreOptions, SynchronousMode};
pub use connector::SqliteConnector;
pub use error::{SqliteError, SqliteResult};
pub use handle::SqliteHandle;
pub use provision::SqliteProvisioner;
pub use registry::SqliteRegistry;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::StoreOptions;
    pub use crate::connector::SqliteConnector;
    pub use crate::error::{SqliteError, SqliteResult};
    pub use crate::handle::SqliteHandle;
    pub use crate::provision::SqliteProvisioner;
    pub use crate::registry::SqliteRegistry;
}
