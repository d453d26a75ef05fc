//! Durable mapping from tenant id to store locator.
//!
//! The registry only ever holds tenant metadata. Branches, groups, members and
//! administrator credentials live in each tenant's private store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::context::{Locator, Tenant, TenantId, TenantStatus, normalize_email};
use crate::error::{TenantError, TenantResult};

/// Registry of tenants and their store locators.
///
/// Every mutation is durable before it returns.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Claim a tenant id in `provisioning` status with no locator.
    ///
    /// Fails with `TenantAlreadyExists` if the id is taken and with
    /// `Conflict` if another tenant already uses the admin email.
    async fn reserve(
        &self,
        id: &TenantId,
        name: &str,
        admin_email: Option<&str>,
    ) -> TenantResult<Tenant>;

    /// Record the locator of a reserved tenant and mark it active.
    async fn activate(&self, id: &TenantId, locator: Locator) -> TenantResult<Tenant>;

    /// Drop a reservation that never became active.
    async fn abandon(&self, id: &TenantId) -> TenantResult<()>;

    /// Raw lookup, regardless of status.
    async fn get(&self, id: &TenantId) -> TenantResult<Option<Tenant>>;

    /// Find the tenant whose founding administrator uses `email`.
    async fn find_by_admin_email(&self, email: &str) -> TenantResult<Option<Tenant>>;

    /// Switch a tenant between `active` and `disabled`.
    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenantResult<Tenant>;

    /// List all tenants ordered by id.
    async fn list(&self) -> TenantResult<Vec<Tenant>>;

    /// Remove a tenant record. Returns the removed record.
    async fn purge(&self, id: &TenantId) -> TenantResult<Tenant>;

    /// Register an already provisioned store in one step.
    ///
    /// Never overwrites: a second registration of the same id fails with
    /// `TenantAlreadyExists` and leaves the first locator untouched.
    async fn register(&self, id: &TenantId, name: &str, locator: Locator) -> TenantResult<Tenant> {
        self.reserve(id, name, None).await?;
        self.activate(id, locator).await
    }

    /// Resolve a tenant that may be served.
    ///
    /// Fails with `TenantNotFound`, `TenantDisabled` or `TenantNotReady`.
    async fn resolve(&self, id: &TenantId) -> TenantResult<Tenant> {
        let tenant = self
            .get(id)
            .await?
            .ok_or_else(|| TenantError::tenant_not_found(id.as_str()))?;
        tenant.servable_locator()?;
        Ok(tenant)
    }
}

/// Check a requested status change.
pub fn check_transition(tenant: &Tenant, to: TenantStatus) -> TenantResult<()> {
    match (tenant.status, to) {
        (TenantStatus::Provisioning, _) => Err(TenantError::tenant_not_ready(tenant.id.as_str())),
        (_, TenantStatus::Provisioning) => Err(TenantError::invalid_input(
            "status",
            "tenants cannot be moved back to provisioning",
        )),
        _ => Ok(()),
    }
}

/// In-process registry, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TenantRegistry for MemoryRegistry {
    async fn reserve(
        &self,
        id: &TenantId,
        name: &str,
        admin_email: Option<&str>,
    ) -> TenantResult<Tenant> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(id) {
            return Err(TenantError::tenant_already_exists(id.as_str()));
        }
        if let Some(email) = admin_email.map(normalize_email) {
            if tenants
                .values()
                .any(|t| t.admin_email.as_deref() == Some(email.as_str()))
            {
                return Err(TenantError::conflict(
                    "An account with this email already exists",
                ));
            }
        }

        let tenant = Tenant::reserved(id.clone(), name, admin_email.map(str::to_string));
        tenants.insert(id.clone(), tenant.clone());
        debug!(tenant_id = %id, "Tenant reserved");
        Ok(tenant)
    }

    async fn activate(&self, id: &TenantId, locator: Locator) -> TenantResult<Tenant> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(id)
            .ok_or_else(|| TenantError::tenant_not_found(id.as_str()))?;
        if tenant.status != TenantStatus::Provisioning {
            return Err(TenantError::tenant_already_exists(id.as_str()));
        }
        tenant.locator = Some(locator);
        tenant.status = TenantStatus::Active;
        tenant.updated_at = Utc::now();
        info!(tenant_id = %id, "Tenant activated");
        Ok(tenant.clone())
    }

    async fn abandon(&self, id: &TenantId) -> TenantResult<()> {
        let mut tenants = self.tenants.write();
        if tenants
            .get(id)
            .is_some_and(|t| t.status == TenantStatus::Provisioning)
        {
            tenants.remove(id);
            debug!(tenant_id = %id, "Tenant reservation abandoned");
        }
        Ok(())
    }

    async fn get(&self, id: &TenantId) -> TenantResult<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_admin_email(&self, email: &str) -> TenantResult<Option<Tenant>> {
        let email = normalize_email(email);
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.admin_email.as_deref() == Some(email.as_str()))
            .cloned())
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenantResult<Tenant> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(id)
            .ok_or_else(|| TenantError::tenant_not_found(id.as_str()))?;
        check_transition(tenant, status)?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        info!(tenant_id = %id, status = %status, "Tenant status changed");
        Ok(tenant.clone())
    }

    async fn list(&self) -> TenantResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.read().values().cloned().collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }

    async fn purge(&self, id: &TenantId) -> TenantResult<Tenant> {
        self.tenants
            .write()
            .remove(id)
            .ok_or_else(|| TenantError::tenant_not_found(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn id(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("grace"), "Grace", Locator::new("/data/grace.sqlite3"))
            .await
            .unwrap();

        let tenant = registry.resolve(&id("grace")).await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(tenant.locator.unwrap().as_str(), "/data/grace.sqlite3");
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let registry = MemoryRegistry::new();
        let err = registry.resolve(&id("nobody")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantNotFound);
    }

    #[tokio::test]
    async fn test_duplicate_register_keeps_first_locator() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("grace"), "Grace", Locator::new("first"))
            .await
            .unwrap();

        let err = registry
            .register(&id("grace"), "Impostor", Locator::new("second"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantAlreadyExists);

        let tenant = registry.resolve(&id("grace")).await.unwrap();
        assert_eq!(tenant.locator.unwrap().as_str(), "first");
        assert_eq!(tenant.name, "Grace");
    }

    #[tokio::test]
    async fn test_reserved_tenant_is_not_ready() {
        let registry = MemoryRegistry::new();
        registry.reserve(&id("new"), "New", None).await.unwrap();

        let err = registry.resolve(&id("new")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantNotReady);

        registry.abandon(&id("new")).await.unwrap();
        assert!(registry.get(&id("new")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandon_ignores_active_tenants() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("grace"), "Grace", Locator::new("x"))
            .await
            .unwrap();
        registry.abandon(&id("grace")).await.unwrap();
        assert!(registry.get(&id("grace")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("grace"), "Grace", Locator::new("x"))
            .await
            .unwrap();

        registry
            .set_status(&id("grace"), TenantStatus::Disabled)
            .await
            .unwrap();
        let err = registry.resolve(&id("grace")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantDisabled);

        registry
            .set_status(&id("grace"), TenantStatus::Active)
            .await
            .unwrap();
        assert!(registry.resolve(&id("grace")).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_email_is_unique() {
        let registry = MemoryRegistry::new();
        registry
            .reserve(&id("a"), "A", Some("pastor@example.com"))
            .await
            .unwrap();
        let err = registry
            .reserve(&id("b"), "B", Some("PASTOR@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        let found = registry
            .find_by_admin_email("Pastor@Example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id("a"));
    }

    #[tokio::test]
    async fn test_purge() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("grace"), "Grace", Locator::new("x"))
            .await
            .unwrap();
        let removed = registry.purge(&id("grace")).await.unwrap();
        assert_eq!(removed.id, id("grace"));
        assert!(registry.is_empty());
        assert!(registry.purge(&id("grace")).await.is_err());
    }
}
