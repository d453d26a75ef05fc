//! Request gating and write/invalidate ordering.
//!
//! Every request for tenant data goes through the [`MutationCoordinator`]:
//! it authorizes the target, leases a handle for the authorized tenant and
//! confirms ownership inside that tenant's store. Writes additionally follow
//! a fixed state machine:
//!
//! ```text
//! Received -> Authorized -> ConnectionLeased -> Committed
//!          -> CacheInvalidated -> Released -> Responded
//! ```
//!
//! A write is only acknowledged after every affected cached collection was
//! invalidated. Invalidation is retried with backoff; if it keeps failing the
//! write fails with `StaleCacheRisk` instead of acknowledging success while
//! stale reads remain possible.
//!
//! A store call that fails after it may have reached the store (a timeout, a
//! lost connection) is passed to [`WriteTxn::abort`], which waits for the
//! store to settle and invalidates the same collections before the error is
//! returned.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, trace, warn};

use crate::cache::{CacheBackend, MemoryCache, ResultCache};
use crate::error::{TenantError, TenantResult};
use crate::model::{Collection, Window};
use crate::tenant::{
    AccessTarget, AuthorizationGuard, Authorized, Connector, OwnershipResolver, PooledHandle,
    Principal, TenantId, TenantPoolManager,
};

/// Stages of a write request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteState {
    Received,
    Authorized,
    ConnectionLeased,
    Committed,
    CacheInvalidated,
    Released,
    Responded,
}

impl WriteState {
    /// Name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorized => "authorized",
            Self::ConnectionLeased => "connection_leased",
            Self::Committed => "committed",
            Self::CacheInvalidated => "cache_invalidated",
            Self::Released => "released",
            Self::Responded => "responded",
        }
    }
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalidation retry settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retries after the first failed invalidation.
    pub invalidation_retries: u32,
    /// Base delay between retries; grows linearly with the attempt.
    pub retry_backoff: Duration,
    /// Longest a failed write waits for its store call to finish before
    /// answering.
    pub settle_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            invalidation_retries: 3,
            retry_backoff: Duration::from_millis(25),
            settle_timeout: Duration::from_secs(30),
        }
    }
}

/// An authorized, confirmed handle to one tenant's store.
pub struct Lease<C: Connector> {
    authorized: Authorized,
    handle: PooledHandle<C>,
}

impl<C: Connector> Lease<C> {
    /// The authorized scope.
    pub fn authorized(&self) -> &Authorized {
        &self.authorized
    }

    /// The authorized tenant id.
    pub fn tenant_id(&self) -> &TenantId {
        self.authorized.tenant_id()
    }

    /// The store handle.
    pub fn conn(&self) -> &C::Handle {
        &self.handle
    }

    /// Close the handle instead of returning it to the pool.
    pub async fn discard(self) {
        self.handle.discard().await;
    }
}

/// Gate for tenant reads and writes.
pub struct MutationCoordinator<C: Connector, B: CacheBackend = MemoryCache> {
    guard: AuthorizationGuard,
    pool: TenantPoolManager<C>,
    cache: Arc<ResultCache<B>>,
    config: CoordinatorConfig,
}

impl<C: Connector, B: CacheBackend> Clone for MutationCoordinator<C, B> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            pool: self.pool.clone(),
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}

impl<C, B> MutationCoordinator<C, B>
where
    C: Connector,
    C::Handle: OwnershipResolver,
    B: CacheBackend,
{
    /// Create a coordinator.
    pub fn new(
        guard: AuthorizationGuard,
        pool: TenantPoolManager<C>,
        cache: Arc<ResultCache<B>>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            guard,
            pool,
            cache,
            config,
        }
    }

    pub fn guard(&self) -> &AuthorizationGuard {
        &self.guard
    }

    pub fn pool(&self) -> &TenantPoolManager<C> {
        &self.pool
    }

    pub fn cache(&self) -> &ResultCache<B> {
        &self.cache
    }

    /// Authorize `target`, lease a handle and confirm ownership.
    pub async fn lease(
        &self,
        principal: &Principal,
        target: &AccessTarget,
    ) -> TenantResult<Lease<C>> {
        let authorized = self.guard.authorize_target(principal, target).await?;
        self.lease_authorized(authorized).await
    }

    /// Lease a handle for a scope authorized elsewhere (e.g. a login).
    pub async fn lease_authorized(&self, authorized: Authorized) -> TenantResult<Lease<C>> {
        let handle = self.pool.acquire(&authorized).await?;
        self.guard.confirm(&authorized, &*handle).await?;
        Ok(Lease { authorized, handle })
    }

    /// Serve a page from the cache or fetch it through `lease`.
    pub async fn read_through<T, F, Fut>(
        &self,
        lease: &Lease<C>,
        collection: Collection,
        window: Window,
        fetch: F,
    ) -> TenantResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantResult<T>>,
    {
        self.cache
            .read_through(lease.tenant_id(), collection, window, fetch)
            .await
    }

    /// Start a write against `target`.
    ///
    /// Returns once the request is authorized, a handle is leased and
    /// ownership is confirmed. Failing at any of those stages has no side
    /// effects.
    pub async fn begin(
        &self,
        principal: &Principal,
        target: &AccessTarget,
    ) -> TenantResult<WriteTxn<'_, C, B>> {
        let mut states = vec![WriteState::Received];
        let authorized = self.guard.authorize_target(principal, target).await?;
        states.push(WriteState::Authorized);
        let handle = self.pool.acquire(&authorized).await?;
        states.push(WriteState::ConnectionLeased);
        self.guard.confirm(&authorized, &*handle).await?;
        trace!(tenant_id = %authorized.tenant_id(), target = %target, "Write started");
        Ok(WriteTxn {
            coordinator: self,
            lease: Lease { authorized, handle },
            states,
        })
    }

    /// Invalidate `affected`, retrying with backoff.
    pub async fn invalidate(&self, tenant: &TenantId, affected: &[Collection]) -> TenantResult<()> {
        let attempts = self.config.invalidation_retries.saturating_add(1);
        for collection in affected {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.cache.invalidate(tenant, collection).await {
                    Ok(_) => break,
                    Err(e) if attempt < attempts => {
                        warn!(
                            tenant_id = %tenant,
                            collection = %collection,
                            attempt,
                            error = %e,
                            "Cache invalidation failed; retrying"
                        );
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                    Err(e) => {
                        error!(
                            tenant_id = %tenant,
                            collection = %collection,
                            attempts = attempt,
                            error = %e,
                            "Cache invalidation failed; write not acknowledged"
                        );
                        return Err(TenantError::stale_cache_risk(
                            format!("{}:{}", tenant, collection),
                            attempt,
                        )
                        .with_tenant(tenant.as_str())
                        .with_source(e));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A write in progress.
///
/// Finish it with [`commit`](Self::commit) or, when the store call failed,
/// [`abort`](Self::abort). Dropping it releases the handle and invalidates
/// nothing, which is only correct when nothing was sent to the store.
pub struct WriteTxn<'a, C: Connector, B: CacheBackend> {
    coordinator: &'a MutationCoordinator<C, B>,
    lease: Lease<C>,
    states: Vec<WriteState>,
}

impl<'a, C, B> WriteTxn<'a, C, B>
where
    C: Connector,
    C::Handle: OwnershipResolver,
    B: CacheBackend,
{
    /// The store handle to mutate through.
    pub fn conn(&self) -> &C::Handle {
        self.lease.conn()
    }

    /// The authorized scope.
    pub fn authorized(&self) -> &Authorized {
        self.lease.authorized()
    }

    /// Current stage.
    pub fn state(&self) -> WriteState {
        self.states.last().copied().unwrap_or(WriteState::Received)
    }

    /// Record a committed mutation, invalidate `affected` and release the
    /// handle.
    pub async fn commit<T>(mut self, value: T, affected: &[Collection]) -> TenantResult<Committed<T>> {
        self.states.push(WriteState::Committed);
        let tenant = self.lease.tenant_id().clone();
        self.coordinator.invalidate(&tenant, affected).await?;
        self.states.push(WriteState::CacheInvalidated);

        let Self {
            lease, mut states, ..
        } = self;
        drop(lease);
        states.push(WriteState::Released);
        trace!(tenant_id = %tenant, "Write committed");
        Ok(Committed { value, states })
    }

    /// Give up on a write whose store call returned `err`.
    ///
    /// Errors raised before anything was written are returned unchanged.
    /// Otherwise the handle's in-flight work is awaited and `affected` is
    /// invalidated before returning, so a write that landed late is never
    /// hidden behind a cached page. If the store does not settle within
    /// `settle_timeout` the error becomes `StaleCacheRisk`, and invalidation
    /// runs again in the background once it does.
    pub async fn abort(self, err: TenantError, affected: &[Collection]) -> TenantError {
        if !err.may_have_committed() {
            return err;
        }
        let coordinator = self.coordinator;
        let tenant = self.lease.tenant_id().clone();
        let settle_timeout = coordinator.config.settle_timeout;

        let settled = match tokio::time::timeout(settle_timeout, self.lease.handle.settle()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant, error = %e, "Store did not settle after failed write");
                false
            }
            Err(_) => {
                warn!(
                    tenant_id = %tenant,
                    timeout_ms = settle_timeout.as_millis() as u64,
                    "Store still busy after failed write"
                );
                false
            }
        };

        if let Err(stale) = coordinator.invalidate(&tenant, affected).await {
            return stale;
        }
        if settled {
            debug!(tenant_id = %tenant, error = %err, "Failed write settled; cache invalidated");
            return err;
        }

        let follow_up = coordinator.clone();
        let affected = affected.to_vec();
        let lease = self.lease;
        tokio::spawn(async move {
            // A wedged store still gives its slot back eventually.
            match tokio::time::timeout(settle_timeout * 10, lease.handle.settle()).await {
                Ok(_) => {
                    if let Err(e) = follow_up.invalidate(lease.tenant_id(), &affected).await {
                        error!(tenant_id = %lease.tenant_id(), error = %e, "Late invalidation failed");
                    }
                }
                Err(_) => error!(
                    tenant_id = %lease.tenant_id(),
                    "Store never settled; cached pages may be stale until they expire"
                ),
            }
            lease.discard().await;
        });

        TenantError::commit_uncertain(tenant.as_str())
            .with_tenant(tenant.as_str())
            .with_source(err)
    }
}

/// A committed and invalidated write, ready to acknowledge.
#[derive(Debug)]
pub struct Committed<T> {
    value: T,
    states: Vec<WriteState>,
}

impl<T> Committed<T> {
    /// Stages passed so far.
    pub fn states(&self) -> &[WriteState] {
        &self.states
    }

    /// Acknowledge the write.
    pub fn respond(mut self) -> T {
        self.states.push(WriteState::Responded);
        self.value
    }
}
