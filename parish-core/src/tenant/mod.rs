//! Database-per-tenant lifecycle and isolation.
//!
//! Each tenant (a church) owns a private store. This module provides the
//! pieces that keep those stores reachable, bounded and isolated:
//!
//! - **[`TenantRegistry`]**: durable mapping from tenant id to store locator.
//!   Holds tenant metadata only, never tenant-owned rows.
//! - **[`TenantPoolManager`]**: lazily opened handles to tenant stores, bounded
//!   by one global capacity with LRU reclaim, idle sweeping and leak
//!   accounting.
//! - **[`AuthorizationGuard`]**: checks that a principal only reaches its own
//!   tenant's resources. The pool only leases handles for the
//!   [`Authorized`] scopes it produces.
//! - **[`ProvisioningService`]**: creates and tags new tenant stores and
//!   reconciles orphans left by interrupted provisioning.
//!
//! # Request flow
//!
//! ```rust,ignore
//! let authorized = guard.authorize(&principal, &group_id).await?;
//! let conn = pool.acquire(&authorized).await?;
//! guard.confirm(&authorized, &*conn).await?;
//! // ... query or mutate through `conn` ...
//! ```

pub mod context;
pub mod guard;
pub mod pool;
pub mod provision;
pub mod registry;

pub use context::{Locator, MAX_TENANT_ID_LEN, Tenant, TenantId, TenantStatus, normalize_email};
pub use guard::{
    AccessTarget, AuthorizationGuard, Authorized, DenyReason, OwnershipResolver, Parent, Principal,
};
pub use pool::{
    Connector, PoolConfig, PoolConfigBuilder, PoolStats, PooledHandle, SweepOutcome,
    SweeperHandle, TenantPoolManager,
};
pub use provision::{
    NewTenant, ProvisionConfig, Provisioner, ProvisioningService, SeedAdmin, StoreInfo, SweepReport,
};
pub use registry::{MemoryRegistry, TenantRegistry};
