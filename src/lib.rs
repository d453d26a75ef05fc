//! # Parish
//!
//! Database-per-tenant connection and consistency manager for church
//! messaging platforms.
//!
//! Every church (tenant) owns a private store. Parish provides:
//! - A tenant registry resolving tenant ids to store locators
//! - A bounded, tenant-keyed connection pool with leak accounting and
//!   bounded-time close
//! - An authorization guard that confirms every accessed resource belongs
//!   to the caller's tenant
//! - A result cache invalidated synchronously on every write, so a read
//!   after a successful write never sees pre-write data
//! - Provisioning with orphan reconciliation
//! - An axum REST surface and SQLite storage engine
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use parish::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TenantError> {
//!     parish::logging::init();
//!     let config = ParishConfig::resolve(None, &parish::config::StdEnvSource)?;
//!     parish::server::run(&config).await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use parish_axum;
pub use parish_core;
pub use parish_sqlite;

/// Configuration loading.
pub mod config {
    pub use parish_core::config::*;
}

/// Logging setup.
pub mod logging {
    pub use parish_core::logging::*;
}

/// Serving the router.
pub mod server {
    pub use parish_axum::server::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use parish_axum::{AppState, router};
    pub use parish_core::prelude::*;
    pub use parish_core::ParishConfig;
    pub use parish_sqlite::{SqliteConnector, SqliteProvisioner, SqliteRegistry};
}

// Re-export key types at the crate root
pub use parish_core::{ErrorCode, ParishConfig, TenantError, TenantResult};
