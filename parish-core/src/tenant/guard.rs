//! Tenant-boundary authorization.
//!
//! Authorization happens in two phases:
//!
//! 1. [`AuthorizationGuard::authorize`] compares the tenant embedded in the
//!    requested resource id with the principal's tenant and checks that the
//!    principal's tenant is active. No store is touched. The result is an
//!    [`Authorized`] scope, which is the only thing the pool accepts when
//!    leasing a handle.
//! 2. [`AuthorizationGuard::confirm`] walks the resource's parent chain
//!    (Member -> Group -> Branch -> church) inside the principal's own store and
//!    denies if any link is missing or points elsewhere.
//!
//! Both phases fail closed with `CrossTenantAccessDenied`. The reason
//! (`cross_tenant`, `not_found`, `broken_chain`) is only logged.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::{Locator, Tenant, TenantId};
use super::registry::TenantRegistry;
use crate::error::{TenantError, TenantResult};
use crate::model::{ResourceId, ResourceKind};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Tenant the credential was issued for.
    pub tenant: TenantId,
    /// Administrator id inside that tenant.
    pub admin_id: String,
    /// Administrator email.
    pub email: String,
}

/// Parent link of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    /// Owned by another resource.
    Resource(ResourceId),
    /// Top of the chain: owned by a church.
    Church(TenantId),
}

/// Looks up parent links inside one tenant store.
#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    /// Parent of `id`, or `None` if the resource does not exist.
    async fn parent_of(&self, id: &ResourceId) -> TenantResult<Option<Parent>>;
}

/// What a request wants to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// A church as a whole, named by a path segment.
    Church(TenantId),
    /// One resource.
    Resource(ResourceId),
    /// A resource that must sit directly under `parent`.
    Nested {
        parent: ResourceId,
        child: ResourceId,
    },
}

impl fmt::Display for AccessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Church(id) => write!(f, "church:{}", id),
            Self::Resource(id) => write!(f, "{}", id),
            Self::Nested { parent, child } => write!(f, "{}/{}", parent, child),
        }
    }
}

/// Why access was denied. Logged, never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The resource belongs to another tenant.
    CrossTenant,
    /// The resource does not exist in the caller's store.
    NotFound,
    /// The parent chain is inconsistent with the request.
    BrokenChain,
}

impl DenyReason {
    /// Name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossTenant => "cross_tenant",
            Self::NotFound => "not_found",
            Self::BrokenChain => "broken_chain",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof that a request may use one tenant's store.
///
/// Only the guard creates these.
#[derive(Debug, Clone)]
pub struct Authorized {
    tenant: Tenant,
    locator: Locator,
    target: Option<ResourceId>,
    parent: Option<ResourceId>,
}

impl Authorized {
    pub(crate) fn for_tenant(tenant: Tenant) -> TenantResult<Self> {
        let locator = tenant.servable_locator()?.clone();
        Ok(Self {
            tenant,
            locator,
            target: None,
            parent: None,
        })
    }

    /// The authorized tenant.
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// The authorized tenant id.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }

    /// Locator of the authorized tenant's store.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The resource the request targets, if any.
    pub fn target(&self) -> Option<&ResourceId> {
        self.target.as_ref()
    }
}

/// Checks that principals only reach their own tenant's resources.
#[derive(Clone)]
pub struct AuthorizationGuard {
    registry: Arc<dyn TenantRegistry>,
}

impl fmt::Debug for AuthorizationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGuard").finish_non_exhaustive()
    }
}

impl AuthorizationGuard {
    /// Create a guard over `registry`.
    pub fn new(registry: Arc<dyn TenantRegistry>) -> Self {
        Self { registry }
    }

    /// Authorize access to the principal's own tenant as a whole.
    pub async fn authorize_tenant(&self, principal: &Principal) -> TenantResult<Authorized> {
        let tenant = self.registry.resolve(&principal.tenant).await?;
        Authorized::for_tenant(tenant)
    }

    /// Authorize access to a church by id (e.g. a `churchId` path segment).
    pub async fn authorize_church(
        &self,
        principal: &Principal,
        church: &TenantId,
    ) -> TenantResult<Authorized> {
        if church != &principal.tenant {
            return Err(deny(principal, church.as_str(), DenyReason::CrossTenant));
        }
        self.authorize_tenant(principal).await
    }

    /// Authorize access to one resource.
    pub async fn authorize(
        &self,
        principal: &Principal,
        resource: &ResourceId,
    ) -> TenantResult<Authorized> {
        if resource.tenant() != &principal.tenant {
            return Err(deny(principal, &resource.to_string(), DenyReason::CrossTenant));
        }
        let mut authorized = self.authorize_tenant(principal).await?;
        authorized.target = Some(resource.clone());
        debug!(tenant_id = %principal.tenant, resource = %resource, "Access authorized");
        Ok(authorized)
    }

    /// Authorize access to `child`, which must sit directly under `parent`.
    pub async fn authorize_nested(
        &self,
        principal: &Principal,
        parent: &ResourceId,
        child: &ResourceId,
    ) -> TenantResult<Authorized> {
        if parent.tenant() != &principal.tenant {
            return Err(deny(principal, &parent.to_string(), DenyReason::CrossTenant));
        }
        let mut authorized = self.authorize(principal, child).await?;
        authorized.parent = Some(parent.clone());
        Ok(authorized)
    }

    /// Authorize any [`AccessTarget`].
    pub async fn authorize_target(
        &self,
        principal: &Principal,
        target: &AccessTarget,
    ) -> TenantResult<Authorized> {
        match target {
            AccessTarget::Church(church) => self.authorize_church(principal, church).await,
            AccessTarget::Resource(resource) => self.authorize(principal, resource).await,
            AccessTarget::Nested { parent, child } => {
                self.authorize_nested(principal, parent, child).await
            }
        }
    }

    /// Scope for the credential check of a login, before any principal exists.
    pub fn authorize_login(&self, tenant: &Tenant) -> TenantResult<Authorized> {
        Authorized::for_tenant(tenant.clone())
    }

    /// Walk the parent chain of the authorized target inside the tenant's
    /// own store.
    pub async fn confirm<R>(&self, authorized: &Authorized, resolver: &R) -> TenantResult<()>
    where
        R: OwnershipResolver + ?Sized,
    {
        let Some(target) = authorized.target.as_ref() else {
            return Ok(());
        };
        let owner = authorized.tenant_id();
        let mut current = target.clone();
        let mut first_hop = true;

        loop {
            let parent = match resolver.parent_of(&current).await? {
                Some(parent) => parent,
                None => {
                    let reason = if first_hop {
                        DenyReason::NotFound
                    } else {
                        DenyReason::BrokenChain
                    };
                    return Err(deny_in(owner, target, reason));
                }
            };

            if first_hop {
                if let Some(expected) = authorized.parent.as_ref() {
                    if parent != Parent::Resource(expected.clone()) {
                        return Err(deny_in(owner, target, DenyReason::BrokenChain));
                    }
                }
                first_hop = false;
            }

            match parent {
                Parent::Church(church) => {
                    if current.kind() != ResourceKind::Branch || &church != owner {
                        return Err(deny_in(owner, target, DenyReason::BrokenChain));
                    }
                    return Ok(());
                }
                Parent::Resource(next) => {
                    let expected_kind = match current.kind() {
                        ResourceKind::Member => ResourceKind::Group,
                        ResourceKind::Group => ResourceKind::Branch,
                        ResourceKind::Branch => {
                            return Err(deny_in(owner, target, DenyReason::BrokenChain));
                        }
                    };
                    if next.kind() != expected_kind || next.tenant() != owner {
                        return Err(deny_in(owner, target, DenyReason::BrokenChain));
                    }
                    current = next;
                }
            }
        }
    }
}

fn deny(principal: &Principal, resource: &str, reason: DenyReason) -> TenantError {
    warn!(
        tenant_id = %principal.tenant,
        admin_id = %principal.admin_id,
        resource = %resource,
        reason = %reason,
        "Access denied"
    );
    TenantError::cross_tenant(resource)
}

fn deny_in(owner: &TenantId, resource: &ResourceId, reason: DenyReason) -> TenantError {
    warn!(
        tenant_id = %owner,
        resource = %resource,
        reason = %reason,
        "Access denied"
    );
    TenantError::cross_tenant(resource.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::tenant::context::TenantStatus;
    use crate::tenant::registry::MemoryRegistry;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn id(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    fn principal(tenant: &str) -> Principal {
        Principal {
            tenant: id(tenant),
            admin_id: "adm-1".into(),
            email: format!("admin@{}.org", tenant),
        }
    }

    async fn guard_with(tenants: &[&str]) -> AuthorizationGuard {
        let registry = MemoryRegistry::new();
        for t in tenants {
            registry
                .register(&id(t), t, Locator::new(format!("/stores/{}.sqlite3", t)))
                .await
                .unwrap();
        }
        AuthorizationGuard::new(Arc::new(registry))
    }

    #[derive(Default)]
    struct Links(Mutex<HashMap<ResourceId, Parent>>);

    impl Links {
        fn link(&self, child: &ResourceId, parent: Parent) {
            self.0.lock().insert(child.clone(), parent);
        }
    }

    #[async_trait]
    impl OwnershipResolver for Links {
        async fn parent_of(&self, id: &ResourceId) -> TenantResult<Option<Parent>> {
            Ok(self.0.lock().get(id).cloned())
        }
    }

    fn chain(tenant: &str) -> (Links, ResourceId, ResourceId, ResourceId) {
        let t = id(tenant);
        let branch = ResourceId::generate(ResourceKind::Branch, &t);
        let group = ResourceId::generate(ResourceKind::Group, &t);
        let member = ResourceId::generate(ResourceKind::Member, &t);
        let links = Links::default();
        links.link(&branch, Parent::Church(t));
        links.link(&group, Parent::Resource(branch.clone()));
        links.link(&member, Parent::Resource(group.clone()));
        (links, branch, group, member)
    }

    #[tokio::test]
    async fn test_cross_tenant_denied_for_every_kind() {
        let guard = guard_with(&["a", "b"]).await;
        let (_, branch, group, member) = chain("a");

        for resource in [&branch, &group, &member] {
            let err = guard.authorize(&principal("b"), resource).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
            assert_eq!(err.http_status(), 403);
        }
    }

    #[tokio::test]
    async fn test_own_resources_allowed_and_confirmed() {
        let guard = guard_with(&["a"]).await;
        let (links, branch, group, member) = chain("a");

        for resource in [&branch, &group, &member] {
            let authorized = guard.authorize(&principal("a"), resource).await.unwrap();
            assert_eq!(authorized.tenant_id().as_str(), "a");
            assert_eq!(authorized.locator().as_str(), "/stores/a.sqlite3");
            guard.confirm(&authorized, &links).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_resource_denied_with_same_status() {
        let guard = guard_with(&["a"]).await;
        let (links, ..) = chain("a");
        let ghost = ResourceId::generate(ResourceKind::Group, &id("a"));

        let authorized = guard.authorize(&principal("a"), &ghost).await.unwrap();
        let err = guard.confirm(&authorized, &links).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
    }

    #[tokio::test]
    async fn test_nested_requires_matching_parent() {
        let guard = guard_with(&["a"]).await;
        let (links, branch, group, member) = chain("a");
        let other_group = ResourceId::generate(ResourceKind::Group, &id("a"));
        links.link(&other_group, Parent::Resource(branch));

        let ok = guard
            .authorize_nested(&principal("a"), &group, &member)
            .await
            .unwrap();
        guard.confirm(&ok, &links).await.unwrap();

        let wrong = guard
            .authorize_nested(&principal("a"), &other_group, &member)
            .await
            .unwrap();
        let err = guard.confirm(&wrong, &links).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
    }

    #[tokio::test]
    async fn test_branch_owned_by_other_church_is_broken_chain() {
        let guard = guard_with(&["a"]).await;
        let branch = ResourceId::generate(ResourceKind::Branch, &id("a"));
        let links = Links::default();
        links.link(&branch, Parent::Church(id("b")));

        let authorized = guard.authorize(&principal("a"), &branch).await.unwrap();
        assert!(guard.confirm(&authorized, &links).await.is_err());
    }

    #[tokio::test]
    async fn test_authorize_target_dispatch() {
        let guard = guard_with(&["a", "b"]).await;
        let (links, _, group, member) = chain("a");

        let nested = AccessTarget::Nested {
            parent: group,
            child: member,
        };
        let authorized = guard.authorize_target(&principal("a"), &nested).await.unwrap();
        guard.confirm(&authorized, &links).await.unwrap();

        let err = guard
            .authorize_target(&principal("b"), &nested)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
    }

    #[tokio::test]
    async fn test_church_path_must_match() {
        let guard = guard_with(&["a", "b"]).await;
        assert!(guard.authorize_church(&principal("a"), &id("a")).await.is_ok());
        let err = guard
            .authorize_church(&principal("a"), &id("b"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
    }

    #[tokio::test]
    async fn test_disabled_principal_tenant_rejected() {
        let registry = MemoryRegistry::new();
        registry
            .register(&id("a"), "A", Locator::new("/stores/a.sqlite3"))
            .await
            .unwrap();
        registry.set_status(&id("a"), TenantStatus::Disabled).await.unwrap();
        let guard = AuthorizationGuard::new(Arc::new(registry));

        let err = guard.authorize_tenant(&principal("a")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantDisabled);
    }

    #[tokio::test]
    async fn test_login_scope_requires_active_tenant() {
        let guard = guard_with(&[]).await;
        let tenant = Tenant::reserved(id("new"), "New", None);
        let err = guard.authorize_login(&tenant).unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantNotReady);
    }
}
