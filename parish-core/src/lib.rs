//! # parish-core
//!
//! Engine-agnostic core of the Parish tenant data plane: each church (tenant)
//! owns a private store, and this crate keeps those stores reachable, bounded,
//! isolated and consistent.
//!
//! - [`tenant`]: registry, bounded connection pool, authorization guard and
//!   provisioning.
//! - [`cache`]: tenant-scoped result cache with generation-checked
//!   invalidation.
//! - [`coordinator`]: request gate that orders writes before invalidation
//!   before acknowledgement.
//! - [`import`]: CSV member import validation.
//! - [`config`], [`logging`]: ambient service setup.
//!
//! Storage engines plug in through the [`tenant::Connector`],
//! [`tenant::TenantRegistry`], [`tenant::Provisioner`] and
//! [`tenant::OwnershipResolver`] traits.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod import;
pub mod logging;
pub mod model;
pub mod tenant;

pub use cache::{CacheBackend, CacheConfig, CacheStats, MemoryCache, ResultCache};
pub use config::ParishConfig;
pub use coordinator::{Committed, CoordinatorConfig, Lease, MutationCoordinator, WriteState, WriteTxn};
pub use error::{ErrorCode, TenantError, TenantResult};
pub use import::{ImportPlan, ImportReport, RowError};
pub use model::{Branch, Collection, Group, Member, NewMember, Page, ResourceId, ResourceKind, Window};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::coordinator::{MutationCoordinator, WriteState};
    pub use crate::error::{ErrorCode, TenantError, TenantResult};
    pub use crate::model::{Collection, ResourceId, ResourceKind, Window};
    pub use crate::tenant::{
        AccessTarget, AuthorizationGuard, Authorized, Principal, Tenant, TenantId,
        TenantPoolManager, TenantRegistry, TenantStatus,
    };
}
