//! End-to-end tests of the SQLite registry, provisioner and connector behind
//! the core pool, guard and coordinator.

use std::sync::Arc;
use std::time::Duration;

use parish_core::cache::{CacheConfig, MemoryCache, ResultCache};
use parish_core::coordinator::{CoordinatorConfig, MutationCoordinator, WriteState};
use parish_core::error::ErrorCode;
use parish_core::model::{Collection, NewMember, Page, Member, ResourceId, ResourceKind, Window};
use parish_core::tenant::{
    AccessTarget, AuthorizationGuard, Locator, NewTenant, PoolConfig, Principal, ProvisionConfig,
    Provisioner, ProvisioningService, SeedAdmin, TenantId, TenantPoolManager, TenantRegistry,
};
use parish_sqlite::{SqliteConnector, SqliteProvisioner, SqliteRegistry, StoreOptions};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Stack {
    _dir: TempDir,
    registry: Arc<SqliteRegistry>,
    provisioner: Arc<SqliteProvisioner>,
    provisioning: ProvisioningService,
    coordinator: MutationCoordinator<SqliteConnector>,
}

async fn stack(orphan_grace: Duration) -> Stack {
    stack_with(orphan_grace, StoreOptions::default()).await
}

async fn stack_with(orphan_grace: Duration, connect_options: StoreOptions) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("registry.sqlite3").display());
    let registry = Arc::new(SqliteRegistry::open(&url).await.unwrap());
    let provisioner = Arc::new(SqliteProvisioner::new(
        dir.path().join("tenants"),
        StoreOptions::default(),
    ));
    let provisioning = ProvisioningService::new(
        registry.clone(),
        provisioner.clone(),
        ProvisionConfig {
            timeout: Duration::from_secs(30),
            orphan_grace,
        },
    );
    let pool = TenantPoolManager::new(
        SqliteConnector::new(connect_options),
        PoolConfig::builder().capacity(4).build(),
    );
    let coordinator = MutationCoordinator::new(
        AuthorizationGuard::new(registry.clone()),
        pool,
        Arc::new(ResultCache::new(MemoryCache::new(1_000), CacheConfig::default())),
        CoordinatorConfig::default(),
    );
    Stack {
        _dir: dir,
        registry,
        provisioner,
        provisioning,
        coordinator,
    }
}

fn new_tenant(id: &str) -> NewTenant {
    NewTenant {
        id: TenantId::parse(id).unwrap(),
        name: format!("{} church", id),
        admin: SeedAdmin {
            email: format!("admin@{}.org", id),
            name: "Admin".into(),
            password_hash: "$argon2id$stub".into(),
        },
    }
}

fn principal(tenant: &str) -> Principal {
    Principal {
        tenant: TenantId::parse(tenant).unwrap(),
        admin_id: "admin".into(),
        email: format!("admin@{}.org", tenant),
    }
}

fn member(n: u32) -> NewMember {
    NewMember {
        first_name: format!("First{}", n),
        last_name: "Member".into(),
        phone: format!("555{:07}", n),
    }
}

/// Create a branch and group for `tenant`, returning the group id.
async fn group_for(stack: &Stack, tenant: &str) -> ResourceId {
    let principal = principal(tenant);
    let church = AccessTarget::Church(principal.tenant.clone());
    let lease = stack.coordinator.lease(&principal, &church).await.unwrap();
    let branch = lease.conn().create_branch("Main").await.unwrap();

    let txn = stack
        .coordinator
        .begin(&principal, &AccessTarget::Resource(branch.id.clone()))
        .await
        .unwrap();
    let group = txn.conn().create_group(&branch.id, "Choir").await.unwrap();
    txn.commit(group, &[Collection::Groups(branch.id.clone())])
        .await
        .unwrap()
        .respond()
        .id
}

async fn list(stack: &Stack, tenant: &str, group: &ResourceId) -> Page<Member> {
    let lease = stack
        .coordinator
        .lease(&principal(tenant), &AccessTarget::Resource(group.clone()))
        .await
        .unwrap();
    let window = Window::default();
    stack
        .coordinator
        .read_through(&lease, Collection::Members(group.clone()), window, || {
            lease.conn().list_members(group, window)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_provisioned_tenant_is_served() {
    let stack = stack(Duration::from_secs(600)).await;
    let tenant = stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    assert!(tenant.is_active());

    let group = group_for(&stack, "grace").await;
    let txn = stack
        .coordinator
        .begin(&principal("grace"), &AccessTarget::Resource(group.clone()))
        .await
        .unwrap();
    let added = txn.conn().add_member(&group, member(1)).await.unwrap();
    let committed = txn
        .commit(added.clone(), &[Collection::Members(group.clone())])
        .await
        .unwrap();
    assert_eq!(
        committed.states(),
        &[
            WriteState::Received,
            WriteState::Authorized,
            WriteState::ConnectionLeased,
            WriteState::Committed,
            WriteState::CacheInvalidated,
            WriteState::Released,
        ]
    );
    committed.respond();

    let page = list(&stack, "grace", &group).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, added.id);
}

#[tokio::test]
async fn test_import_then_delete_is_read_back() {
    let stack = stack(Duration::from_secs(600)).await;
    stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let group = group_for(&stack, "grace").await;

    // Prime the cache with the empty list.
    assert_eq!(list(&stack, "grace", &group).await.total, 0);

    let mut csv = String::from("firstName,lastName,phone\n");
    for n in 0..100 {
        csv.push_str(&format!("First{},Member,555{:07}\n", n, n));
    }
    csv.push_str("Bad,Row,12ab\n");

    let txn = stack
        .coordinator
        .begin(&principal("grace"), &AccessTarget::Resource(group.clone()))
        .await
        .unwrap();
    let report = txn.conn().import_members(&group, csv).await.unwrap();
    let report = txn
        .commit(report, &[Collection::Members(group.clone())])
        .await
        .unwrap()
        .respond();
    assert_eq!((report.imported, report.failed, report.total), (100, 1, 101));
    assert_eq!(report.errors[0].row, 101);

    let page = list(&stack, "grace", &group).await;
    assert_eq!(page.total, 100);

    let victim = page.items[0].id.clone();
    let txn = stack
        .coordinator
        .begin(
            &principal("grace"),
            &AccessTarget::Nested {
                parent: group.clone(),
                child: victim.clone(),
            },
        )
        .await
        .unwrap();
    txn.conn().delete_member(&group, &victim).await.unwrap();
    txn.commit((), &[Collection::Members(group.clone())])
        .await
        .unwrap()
        .respond();

    let page = list(&stack, "grace", &group).await;
    assert_eq!(page.total, 99);
    assert!(page.items.iter().all(|m| m.id != victim));
}

#[tokio::test]
async fn test_duplicate_phone_in_group_conflicts() {
    let stack = stack(Duration::from_secs(600)).await;
    stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let group = group_for(&stack, "grace").await;

    let lease = stack
        .coordinator
        .lease(&principal("grace"), &AccessTarget::Resource(group.clone()))
        .await
        .unwrap();
    lease.conn().add_member(&group, member(7)).await.unwrap();
    let err = lease.conn().add_member(&group, member(7)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    let csv = "firstName,lastName,phone\nDup,Row,5550000007\nNew,Row,5550000008\n".to_string();
    let report = lease.conn().import_members(&group, csv).await.unwrap();
    assert_eq!((report.imported, report.failed), (1, 1));
    assert_eq!(report.errors[0].reason, "duplicate phone");
}

#[tokio::test]
async fn test_cross_tenant_access_is_denied() {
    let stack = stack(Duration::from_secs(600)).await;
    stack.provisioning.provision(&new_tenant("alpha")).await.unwrap();
    stack.provisioning.provision(&new_tenant("beta")).await.unwrap();
    let beta_group = group_for(&stack, "beta").await;

    let err = stack
        .coordinator
        .begin(&principal("alpha"), &AccessTarget::Resource(beta_group.clone()))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
    assert_eq!(err.http_status(), 403);

    // An id claiming alpha's tenant that does not exist in alpha's store.
    let forged = ResourceId::generate(ResourceKind::Group, &TenantId::parse("alpha").unwrap());
    let err = stack
        .coordinator
        .lease(&principal("alpha"), &AccessTarget::Resource(forged))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);

    assert_eq!(list(&stack, "beta", &beta_group).await.total, 0);
}

#[tokio::test]
async fn test_member_of_other_group_is_denied() {
    let stack = stack(Duration::from_secs(600)).await;
    stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let first = group_for(&stack, "grace").await;
    let second = group_for(&stack, "grace").await;

    let lease = stack
        .coordinator
        .lease(&principal("grace"), &AccessTarget::Resource(second.clone()))
        .await
        .unwrap();
    let stranger = lease.conn().add_member(&second, member(3)).await.unwrap();
    drop(lease);

    let err = stack
        .coordinator
        .begin(
            &principal("grace"),
            &AccessTarget::Nested {
                parent: first,
                child: stranger.id,
            },
        )
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::CrossTenantAccessDenied);
}

#[tokio::test]
async fn test_connector_refuses_foreign_store() {
    let stack = stack(Duration::from_secs(600)).await;
    let alpha = stack.provisioning.provision(&new_tenant("alpha")).await.unwrap();

    // Point a second tenant at a copy of alpha's store.
    let intruder = TenantId::parse("intruder").unwrap();
    let copy = format!("{}.copy.sqlite3", alpha.locator.as_ref().unwrap());
    std::fs::copy(alpha.locator.as_ref().unwrap().as_str(), &copy).unwrap();
    stack
        .registry
        .register(&intruder, "Intruder", Locator::new(copy))
        .await
        .unwrap();

    let err = stack
        .coordinator
        .lease(
            &principal("intruder"),
            &AccessTarget::Church(intruder.clone()),
        )
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::ConnectionFailed);
    assert_eq!(stack.coordinator.pool().stats().leased, 0);
}

#[tokio::test]
async fn test_admin_lookup_in_tenant_store() {
    let stack = stack(Duration::from_secs(600)).await;
    let tenant = stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let found = stack
        .registry
        .find_by_admin_email("ADMIN@grace.org")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, tenant.id);

    let authorized = stack.coordinator.guard().authorize_login(&found).unwrap();
    let lease = stack.coordinator.lease_authorized(authorized).await.unwrap();
    let creds = lease.conn().find_admin("admin@grace.org").await.unwrap().unwrap();
    assert_eq!(creds.password_hash, "$argon2id$stub");
    assert!(lease.conn().find_admin("nobody@grace.org").await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphan_sweep_removes_unregistered_stores() {
    let stack = stack(Duration::ZERO).await;
    let kept = stack.provisioning.provision(&new_tenant("grace")).await.unwrap();

    let orphan_owner = TenantId::parse("ghost").unwrap();
    let orphan = stack
        .provisioner
        .create_store(&orphan_owner, &new_tenant("ghost").admin)
        .await
        .unwrap();

    let report = stack.provisioning.sweep_orphans().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.removed, 1);
    assert_eq!(report.kept, 1);
    assert!(!std::path::Path::new(orphan.as_str()).exists());
    assert!(std::path::Path::new(kept.locator.unwrap().as_str()).exists());
}

#[tokio::test]
async fn test_duplicate_provision_leaves_first_store() {
    let stack = stack(Duration::from_secs(600)).await;
    let first = stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let err = stack
        .provisioning
        .provision(&new_tenant("grace"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TenantAlreadyExists);

    let current = stack
        .registry
        .resolve(&TenantId::parse("grace").unwrap())
        .await
        .unwrap();
    assert_eq!(current.locator, first.locator);
    assert_eq!(stack.provisioner.list_stores().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_twenty_tenants_share_a_small_pool() {
    let stack = stack(Duration::from_secs(600)).await;
    for n in 0..20 {
        let id = format!("church-{:02}", n);
        stack.provisioning.provision(&new_tenant(&id)).await.unwrap();
        let lease = stack
            .coordinator
            .lease(&principal(&id), &AccessTarget::Church(TenantId::parse(&id).unwrap()))
            .await
            .unwrap();
        lease.conn().create_branch("Main").await.unwrap();
    }

    let stats = stack.coordinator.pool().stats();
    assert!(stats.cached <= 4);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.potential_leaks, 0);

    stack.coordinator.pool().shutdown().await;
    assert_eq!(stack.coordinator.pool().stats().potential_leaks, 0);
}

#[tokio::test]
async fn test_import_past_query_timeout_is_not_served_stale() {
    let options = StoreOptions::default().query_timeout(Duration::from_millis(100));
    let stack = stack_with(Duration::from_secs(600), options).await;
    stack.provisioning.provision(&new_tenant("grace")).await.unwrap();
    let group = group_for(&stack, "grace").await;
    assert_eq!(list(&stack, "grace", &group).await.total, 0);

    let mut csv = String::from("firstName,lastName,phone\n");
    for n in 0..200_000u32 {
        csv.push_str(&format!("First{},Member,555{:07}\n", n, n));
    }
    let txn = stack
        .coordinator
        .begin(&principal("grace"), &AccessTarget::Resource(group.clone()))
        .await
        .unwrap();
    let affected = [Collection::Members(group.clone())];
    let result = txn.conn().import_members(&group, csv).await;
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::QueryTimeout);

    // The import kept running on the store thread; the error is only
    // returned once it finished and the cached page was dropped.
    let err = txn.abort(err, &affected).await;
    assert_eq!(err.code, ErrorCode::QueryTimeout);
    assert_eq!(list(&stack, "grace", &group).await.total, 200_000);
    assert_eq!(stack.coordinator.pool().stats().leased, 0);
}
