//! Creating, reconciling and purging tenant stores.
//!
//! Provisioning reserves the tenant id first, then creates the store, then
//! records the locator. A tenant therefore never has a locator unless its
//! store is ready, and a crash in the middle leaves either a stale
//! reservation or an unregistered store. Every store is tagged with its
//! owning tenant, so [`ProvisioningService::sweep_orphans`] can reconcile both.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::context::{Locator, Tenant, TenantId, TenantStatus};
use super::registry::TenantRegistry;
use crate::error::{TenantError, TenantResult};

/// First administrator of a new tenant.
#[derive(Debug, Clone)]
pub struct SeedAdmin {
    /// Login email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Password hash (never the plain password).
    pub password_hash: String,
}

/// A tenant to provision.
#[derive(Debug, Clone)]
pub struct NewTenant {
    /// Requested tenant id.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// First administrator.
    pub admin: SeedAdmin,
}

/// A store found on the storage backend.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    /// Where the store lives.
    pub locator: Locator,
    /// Owner recorded in the store's tag, if readable.
    pub owner: Option<TenantId>,
    /// Whether schema and seed data were completed.
    pub ready: bool,
    /// Time since the store was created.
    pub age: Duration,
}

/// Storage backend operations used by provisioning.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a new isolated store, apply the current schema, seed the first
    /// administrator and tag it with its owner. Never reuses an existing store.
    async fn create_store(&self, tenant: &TenantId, admin: &SeedAdmin) -> TenantResult<Locator>;

    /// Delete a store.
    async fn remove_store(&self, locator: &Locator) -> TenantResult<()>;

    /// Enumerate every store the backend holds.
    async fn list_stores(&self) -> TenantResult<Vec<StoreInfo>>;
}

/// Provisioning limits.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Bound on creating one store.
    pub timeout: Duration,
    /// Age before an unregistered store or reservation counts as orphaned.
    pub orphan_grace: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            orphan_grace: Duration::from_secs(600),
        }
    }
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stores inspected.
    pub scanned: usize,
    /// Orphaned stores deleted.
    pub removed: usize,
    /// Stores kept (registered, or too young to judge).
    pub kept: usize,
    /// Stale `provisioning` reservations dropped.
    pub stale_reservations: usize,
}

/// Orchestrates registry and storage backend.
#[derive(Clone)]
pub struct ProvisioningService {
    registry: Arc<dyn TenantRegistry>,
    provisioner: Arc<dyn Provisioner>,
    config: ProvisionConfig,
}

impl std::fmt::Debug for ProvisioningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProvisioningService {
    /// Create the service.
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        provisioner: Arc<dyn Provisioner>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            registry,
            provisioner,
            config,
        }
    }

    /// The registry this service records into.
    pub fn registry(&self) -> &Arc<dyn TenantRegistry> {
        &self.registry
    }

    /// Provision a new tenant and return its active registry record.
    ///
    /// Fails with `TenantAlreadyExists` without side effects if the id is
    /// taken. Any later failure rolls the reservation back and surfaces as
    /// `ProvisioningFailed`.
    pub async fn provision(&self, new: &NewTenant) -> TenantResult<Tenant> {
        let id = &new.id;
        self.registry
            .reserve(id, &new.name, Some(&new.admin.email))
            .await?;

        let created =
            tokio::time::timeout(self.config.timeout, self.provisioner.create_store(id, &new.admin))
                .await;

        let locator = match created {
            Ok(Ok(locator)) => locator,
            Ok(Err(e)) => {
                self.rollback(id, None).await;
                return Err(TenantError::provisioning_failed(id.as_str(), e.message.clone())
                    .with_source(e));
            }
            Err(_) => {
                self.rollback(id, None).await;
                return Err(TenantError::provisioning_failed(
                    id.as_str(),
                    format!("timed out after {}s", self.config.timeout.as_secs()),
                ));
            }
        };

        match self.registry.activate(id, locator.clone()).await {
            Ok(tenant) => {
                info!(tenant_id = %id, locator = %locator, "Tenant provisioned");
                Ok(tenant)
            }
            Err(e) => {
                self.rollback(id, Some(&locator)).await;
                Err(TenantError::provisioning_failed(id.as_str(), e.message.clone()).with_source(e))
            }
        }
    }

    async fn rollback(&self, id: &TenantId, locator: Option<&Locator>) {
        if let Some(locator) = locator {
            if let Err(e) = self.provisioner.remove_store(locator).await {
                warn!(tenant_id = %id, error = %e, "Removing failed store; orphan sweep will retry");
            }
        }
        if let Err(e) = self.registry.abandon(id).await {
            warn!(tenant_id = %id, error = %e, "Abandoning reservation failed");
        }
    }

    /// Remove unregistered stores and stale reservations.
    pub async fn sweep_orphans(&self) -> TenantResult<SweepReport> {
        let grace = self.config.orphan_grace;
        let mut report = SweepReport::default();

        let tenants = self.registry.list().await?;
        let now = Utc::now();
        for tenant in tenants.iter().filter(|t| t.status == TenantStatus::Provisioning) {
            let age = (now - tenant.created_at).to_std().unwrap_or_default();
            if age >= grace {
                self.registry.abandon(&tenant.id).await?;
                report.stale_reservations += 1;
                info!(tenant_id = %tenant.id, "Dropped stale reservation");
            }
        }

        for store in self.provisioner.list_stores().await? {
            report.scanned += 1;
            let registered = store.owner.as_ref().is_some_and(|owner| {
                tenants.iter().any(|t| {
                    &t.id == owner
                        && t.status != TenantStatus::Provisioning
                        && t.locator.as_ref() == Some(&store.locator)
                })
            });
            if registered || store.age < grace {
                report.kept += 1;
                continue;
            }

            match self.provisioner.remove_store(&store.locator).await {
                Ok(()) => {
                    report.removed += 1;
                    info!(
                        locator = %store.locator,
                        owner = store.owner.as_ref().map(|o| o.as_str()).unwrap_or("unknown"),
                        ready = store.ready,
                        "Removed orphaned store"
                    );
                }
                Err(e) => {
                    report.kept += 1;
                    warn!(locator = %store.locator, error = %e, "Removing orphaned store failed");
                }
            }
        }

        Ok(report)
    }

    /// Remove a tenant record and delete its store.
    ///
    /// Callers serving requests must evict the tenant's pooled handles first.
    pub async fn deprovision(&self, id: &TenantId) -> TenantResult<Tenant> {
        let tenant = self.registry.purge(id).await?;
        if let Some(locator) = tenant.locator.as_ref() {
            self.provisioner.remove_store(locator).await?;
        }
        info!(tenant_id = %id, "Tenant purged");
        Ok(tenant)
    }
}
