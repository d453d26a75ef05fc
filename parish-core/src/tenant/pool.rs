//! Bounded pool of live handles to per-tenant stores.
//!
//! Every tenant owns a private store, so the number of distinct connection
//! targets is unbounded while the number of tenants active at once is small.
//! The pool therefore bounds the *total* number of live handles (idle and
//! leased) across all tenants with one global capacity `C`:
//!
//! - **Lazy opening**: a handle is opened on the first acquire for a tenant,
//!   never ahead of time.
//! - **Per-tenant slots**: each tenant has its own slot and lock; one tenant's
//!   churn never blocks another tenant's requests.
//! - **LRU reclaim**: when `C` handles are live, the least recently used idle
//!   handle of any tenant is closed to make room before waiting.
//! - **Bounded waits**: an acquire that cannot get a slot within
//!   `acquire_timeout` fails with `PoolExhausted`.
//! - **Idle sweep**: handles idle longer than `idle_timeout` are closed. Each
//!   close is bounded by `disconnect_timeout`; a close that hangs is abandoned,
//!   logged as a potential leak, and its slot is reclaimed regardless.
//!
//! # Leak accounting
//!
//! `potential_leaks = created - cached - leased - closing - closed`. Every
//! handle is in exactly one of those states, so the value equals the number of
//! abandoned closes and stays at zero while disconnects behave.
//!
//! # Example
//!
//! ```rust,ignore
//! use parish_core::tenant::{PoolConfig, TenantPoolManager};
//!
//! let pool = TenantPoolManager::new(connector, PoolConfig::builder().capacity(64).build());
//! let _sweeper = pool.spawn_sweeper();
//!
//! let authorized = guard.authorize(&principal, &group_id).await?;
//! let conn = pool.acquire(&authorized).await?;
//! // use conn; it returns to the pool when dropped
//! ```

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::context::{Locator, TenantId};
use super::guard::Authorized;
use crate::error::{ErrorCode, TenantError, TenantResult};

/// Opens and closes handles to tenant stores.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The live handle type.
    type Handle: Send + Sync + 'static;

    /// Open a handle to the store at `locator`.
    async fn connect(&self, tenant: &TenantId, locator: &Locator) -> TenantResult<Self::Handle>;

    /// Close a handle.
    async fn close(&self, handle: Self::Handle) -> TenantResult<()>;

    /// Whether an idle handle may be handed out again.
    fn is_valid(&self, _handle: &Self::Handle) -> bool {
        true
    }

    /// Wait until work already submitted through `handle` has finished,
    /// including calls whose caller stopped waiting.
    async fn settle(&self, _handle: &Self::Handle) -> TenantResult<()> {
        Ok(())
    }
}

/// Configuration for the tenant pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live handles across all tenants.
    pub capacity: usize,
    /// Maximum live handles for one tenant.
    pub max_per_tenant: usize,
    /// Longest an acquire may wait for a slot.
    pub acquire_timeout: Duration,
    /// Longest opening a handle may take.
    pub connect_timeout: Duration,
    /// Idle time after which a handle is closed.
    pub idle_timeout: Duration,
    /// Longest a close may take before the handle is abandoned.
    pub disconnect_timeout: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_per_tenant: 4,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            disconnect_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new config builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for pool configuration.
#[derive(Default)]
pub struct PoolConfigBuilder {
    capacity: Option<usize>,
    max_per_tenant: Option<usize>,
    acquire_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    disconnect_timeout: Option<Duration>,
    sweep_interval: Option<Duration>,
}

impl PoolConfigBuilder {
    /// Set the global capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the per-tenant limit.
    pub fn max_per_tenant(mut self, max: usize) -> Self {
        self.max_per_tenant = Some(max);
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the disconnect timeout.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = Some(timeout);
        self
    }

    /// Set the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Build the config.
    pub fn build(self) -> PoolConfig {
        let defaults = PoolConfig::default();
        let capacity = self.capacity.unwrap_or(defaults.capacity).max(1);
        PoolConfig {
            capacity,
            max_per_tenant: self
                .max_per_tenant
                .unwrap_or(defaults.max_per_tenant)
                .clamp(1, capacity),
            acquire_timeout: self.acquire_timeout.unwrap_or(defaults.acquire_timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            idle_timeout: self.idle_timeout.unwrap_or(defaults.idle_timeout),
            disconnect_timeout: self
                .disconnect_timeout
                .unwrap_or(defaults.disconnect_timeout),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
        }
    }
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Global capacity.
    pub capacity: usize,
    /// Unused global slots.
    pub available: usize,
    /// Tenants with a live slot.
    pub tenants: usize,
    /// Handles ever opened.
    pub created: u64,
    /// Handles currently idle and reusable.
    pub cached: u64,
    /// Handles currently leased.
    pub leased: u64,
    /// Handles with a close in flight.
    pub closing: u64,
    /// Handles closed.
    pub closed: u64,
    /// Handles whose close timed out.
    pub abandoned: u64,
    /// Created handles not accounted for as cached, leased, closing or closed.
    pub potential_leaks: u64,
    /// Acquires served from an idle handle.
    pub reused: u64,
    /// Idle handles closed to make room for another tenant.
    pub reclaimed: u64,
    /// Successful acquires.
    pub acquires: u64,
    /// Acquires that failed with `PoolExhausted`.
    pub timeouts: u64,
    /// Longest acquire wait observed (ms).
    pub max_wait_ms: u64,
}

/// Thread-safe pool statistics.
#[derive(Debug, Default)]
struct AtomicPoolStats {
    created: AtomicU64,
    cached: AtomicU64,
    leased: AtomicU64,
    closing: AtomicU64,
    closed: AtomicU64,
    abandoned: AtomicU64,
    reused: AtomicU64,
    reclaimed: AtomicU64,
    acquires: AtomicU64,
    timeouts: AtomicU64,
    max_wait_ms: AtomicU64,
}

impl AtomicPoolStats {
    fn record_acquire(&self, wait: Duration, reused: bool) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        }

        let wait_ms = wait.as_millis() as u64;
        let mut current = self.max_wait_ms.load(Ordering::Relaxed);
        while wait_ms > current {
            match self.max_wait_ms.compare_exchange_weak(
                current,
                wait_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    fn opened(&self) {
        self.created.fetch_add(1, Ordering::AcqRel);
        self.leased.fetch_add(1, Ordering::AcqRel);
    }

    fn idle_to_leased(&self) {
        self.leased.fetch_add(1, Ordering::AcqRel);
        self.cached.fetch_sub(1, Ordering::AcqRel);
    }

    fn leased_to_idle(&self) {
        self.cached.fetch_add(1, Ordering::AcqRel);
        self.leased.fetch_sub(1, Ordering::AcqRel);
    }

    fn idle_to_closing(&self) {
        self.closing.fetch_add(1, Ordering::AcqRel);
        self.cached.fetch_sub(1, Ordering::AcqRel);
    }

    fn leased_to_closing(&self) {
        self.closing.fetch_add(1, Ordering::AcqRel);
        self.leased.fetch_sub(1, Ordering::AcqRel);
    }

    fn closing_to_closed(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
        self.closing.fetch_sub(1, Ordering::AcqRel);
    }

    fn closing_to_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::AcqRel);
        self.closing.fetch_sub(1, Ordering::AcqRel);
    }

    fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reclaim(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        let closed = self.closed.load(Ordering::Acquire);
        let closing = self.closing.load(Ordering::Acquire);
        let cached = self.cached.load(Ordering::Acquire);
        let leased = self.leased.load(Ordering::Acquire);
        let created = self.created.load(Ordering::Acquire);
        PoolStats {
            created,
            cached,
            leased,
            closing,
            closed,
            abandoned: self.abandoned.load(Ordering::Acquire),
            potential_leaks: created
                .saturating_sub(cached)
                .saturating_sub(leased)
                .saturating_sub(closing)
                .saturating_sub(closed),
            reused: self.reused.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            acquires: self.acquires.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            max_wait_ms: self.max_wait_ms.load(Ordering::Relaxed),
            ..PoolStats::default()
        }
    }
}

/// Result of a sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Handles closed cleanly.
    pub closed: usize,
    /// Handles abandoned after the disconnect timeout.
    pub abandoned: usize,
    /// Empty tenant slots removed from the map.
    pub retired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOutcome {
    Closed,
    Abandoned,
}

/// An idle handle parked in a tenant slot.
struct PoolEntry<H> {
    handle: H,
    permit: OwnedSemaphorePermit,
    created_at: Instant,
    last_used: Instant,
}

struct SlotState<H> {
    /// Oldest at the front.
    idle: VecDeque<PoolEntry<H>>,
    /// Leases checked out or being opened.
    leased: usize,
    /// Removed from the map; no longer accepts handles.
    retired: bool,
}

struct TenantSlot<H> {
    tenant: TenantId,
    limit: Arc<Semaphore>,
    state: Mutex<SlotState<H>>,
}

impl<H> TenantSlot<H> {
    fn new(tenant: TenantId, max_per_tenant: usize) -> Self {
        Self {
            tenant,
            limit: Arc::new(Semaphore::new(max_per_tenant)),
            state: Mutex::new(SlotState {
                idle: VecDeque::new(),
                leased: 0,
                retired: false,
            }),
        }
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    capacity: Arc<Semaphore>,
    slots: RwLock<HashMap<TenantId, Arc<TenantSlot<C::Handle>>>>,
    released: Notify,
    stats: AtomicPoolStats,
    closed: AtomicBool,
}

impl<C: Connector> PoolInner<C> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot_for(&self, tenant: &TenantId) -> Arc<TenantSlot<C::Handle>> {
        if let Some(slot) = self.slots.read().get(tenant) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(tenant.clone()).or_insert_with(|| {
            Arc::new(TenantSlot::new(tenant.clone(), self.config.max_per_tenant))
        }))
    }

    fn exhausted(&self, started: Instant) -> TenantError {
        self.stats.record_timeout();
        TenantError::pool_exhausted(self.config.capacity, started.elapsed())
    }

    /// Take a global slot, reclaiming another tenant's idle handle if needed.
    async fn global_permit(
        &self,
        started: Instant,
        deadline: Instant,
    ) -> TenantResult<OwnedSemaphorePermit> {
        loop {
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();

            match Arc::clone(&self.capacity).try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::Closed) => return Err(TenantError::pool_closed()),
                Err(TryAcquireError::NoPermits) => {}
            }

            if let Some((tenant, entry)) = self.take_lru_idle() {
                info!(tenant_id = %tenant, "Reclaiming idle handle to make room");
                self.stats.record_reclaim();
                self.close_handle(&tenant, entry.handle, entry.permit).await;
                continue;
            }

            tokio::select! {
                permit = Arc::clone(&self.capacity).acquire_owned() => {
                    return permit.map_err(|_| TenantError::pool_closed());
                }
                _ = released => continue,
                _ = tokio::time::sleep_until(deadline) => return Err(self.exhausted(started)),
            }
        }
    }

    /// Pop the least recently used idle handle across all tenants.
    fn take_lru_idle(&self) -> Option<(TenantId, PoolEntry<C::Handle>)> {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();

        let mut oldest: Option<(Instant, Arc<TenantSlot<C::Handle>>)> = None;
        for slot in slots {
            let last_used = slot.state.lock().idle.front().map(|e| e.last_used);
            if let Some(last_used) = last_used {
                if oldest.as_ref().is_none_or(|(t, _)| last_used < *t) {
                    oldest = Some((last_used, slot));
                }
            }
        }

        let (_, slot) = oldest?;
        let entry = slot.state.lock().idle.pop_front()?;
        self.stats.idle_to_closing();
        Some((slot.tenant.clone(), entry))
    }

    /// Close a handle within the disconnect timeout, then free its slot.
    ///
    /// The caller has already moved the handle into the `closing` state.
    async fn close_handle(
        &self,
        tenant: &TenantId,
        handle: C::Handle,
        permit: OwnedSemaphorePermit,
    ) -> CloseOutcome {
        let timeout = self.config.disconnect_timeout;
        let outcome = match tokio::time::timeout(timeout, self.connector.close(handle)).await {
            Ok(Ok(())) => {
                trace!(tenant_id = %tenant, "Handle closed");
                self.stats.closing_to_closed();
                CloseOutcome::Closed
            }
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant, error = %e, "Closing handle failed");
                self.stats.closing_to_closed();
                CloseOutcome::Closed
            }
            Err(_) => {
                let err = TenantError::leak_suspected(tenant.as_str(), timeout);
                warn!(
                    tenant_id = %tenant,
                    code = %ErrorCode::ConnectionLeakSuspected,
                    timeout_ms = timeout.as_millis() as u64,
                    "{}",
                    err.message
                );
                self.stats.closing_to_abandoned();
                CloseOutcome::Abandoned
            }
        };
        drop(permit);
        outcome
    }

    fn spawn_close(self: &Arc<Self>, tenant: TenantId, handle: C::Handle, permit: OwnedSemaphorePermit) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move {
                    inner.close_handle(&tenant, handle, permit).await;
                });
            }
            Err(_) => {
                drop(handle);
                drop(permit);
                self.stats.closing_to_closed();
            }
        }
    }

    async fn close_all(&self, entries: Vec<(TenantId, PoolEntry<C::Handle>)>) -> SweepOutcome {
        let outcomes = futures::future::join_all(
            entries
                .into_iter()
                .map(|(tenant, entry)| async move {
                    self.close_handle(&tenant, entry.handle, entry.permit).await
                }),
        )
        .await;

        let mut outcome = SweepOutcome::default();
        for o in outcomes {
            match o {
                CloseOutcome::Closed => outcome.closed += 1,
                CloseOutcome::Abandoned => outcome.abandoned += 1,
            }
        }
        outcome
    }

    fn drain_idle<F>(&self, mut expired: F) -> Vec<(TenantId, PoolEntry<C::Handle>)>
    where
        F: FnMut(&TenantId, &PoolEntry<C::Handle>) -> bool,
    {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut drained = Vec::new();
        for slot in slots {
            let mut state = slot.state.lock();
            while let Some(front) = state.idle.front() {
                if !expired(&slot.tenant, front) {
                    break;
                }
                if let Some(entry) = state.idle.pop_front() {
                    self.stats.idle_to_closing();
                    drained.push((slot.tenant.clone(), entry));
                }
            }
        }
        drained
    }

    fn retire_empty_slots(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| {
            let mut state = slot.state.lock();
            if state.idle.is_empty() && state.leased == 0 {
                state.retired = true;
                false
            } else {
                true
            }
        });
        before - slots.len()
    }

    async fn sweep(&self) -> SweepOutcome {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let expired =
            self.drain_idle(|_, entry| now.saturating_duration_since(entry.last_used) >= idle_timeout);
        let mut outcome = self.close_all(expired).await;
        outcome.retired = self.retire_empty_slots();
        outcome
    }
}

/// Manages live handles to tenant stores under a global capacity.
pub struct TenantPoolManager<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for TenantPoolManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> std::fmt::Debug for TenantPoolManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPoolManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Connector> TenantPoolManager<C> {
    /// Create a pool over `connector`.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        info!(
            capacity = config.capacity,
            max_per_tenant = config.max_per_tenant,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "Tenant pool created"
        );
        Self {
            inner: Arc::new(PoolInner {
                capacity: Arc::new(Semaphore::new(config.capacity)),
                connector,
                config,
                slots: RwLock::new(HashMap::new()),
                released: Notify::new(),
                stats: AtomicPoolStats::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connector used to open handles.
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Lease a handle for an authorized request.
    ///
    /// Only the authorized tenant's store can be reached, so a request can
    /// never lease a connection for a tenant other than its own.
    pub async fn acquire(&self, scope: &Authorized) -> TenantResult<PooledHandle<C>> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(TenantError::pool_closed());
        }

        let tenant = scope.tenant_id();
        let started = Instant::now();
        let deadline = started + inner.config.acquire_timeout;

        let (mut lease, stale) = loop {
            let slot = inner.slot_for(tenant);
            let tenant_permit =
                match tokio::time::timeout_at(deadline, Arc::clone(&slot.limit).acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(TenantError::pool_closed()),
                    Err(_) => return Err(inner.exhausted(started)),
                };

            let mut state = slot.state.lock();
            if state.retired {
                continue;
            }
            state.leased += 1;

            let mut stale = Vec::new();
            let mut reused = None;
            while let Some(entry) = state.idle.pop_back() {
                if inner.connector.is_valid(&entry.handle)
                    && entry.last_used.elapsed() < inner.config.idle_timeout
                {
                    inner.stats.idle_to_leased();
                    reused = Some(entry);
                    break;
                }
                inner.stats.idle_to_closing();
                stale.push((slot.tenant.clone(), entry));
            }
            drop(state);

            let mut lease = PooledHandle {
                handle: None,
                permit: None,
                created_at: started,
                broken: false,
                reserved: true,
                _tenant_permit: tenant_permit,
                slot,
                pool: Arc::clone(inner),
            };
            if let Some(entry) = reused {
                lease.handle = Some(entry.handle);
                lease.permit = Some(entry.permit);
                lease.created_at = entry.created_at;
            }
            break (lease, stale);
        };

        if !stale.is_empty() {
            inner.close_all(stale).await;
        }

        if lease.handle.is_some() {
            trace!(tenant_id = %tenant, "Reusing idle handle");
            inner.stats.record_acquire(started.elapsed(), true);
            return Ok(lease);
        }

        let permit = inner.global_permit(started, deadline).await?;
        let locator = scope.locator();
        let handle = match tokio::time::timeout(
            inner.config.connect_timeout,
            inner.connector.connect(tenant, locator),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant, error = %e, "Opening tenant store failed");
                return Err(e);
            }
            Err(_) => {
                warn!(tenant_id = %tenant, "Opening tenant store timed out");
                return Err(TenantError::connection_timeout(inner.config.connect_timeout));
            }
        };

        inner.stats.opened();
        inner.stats.record_acquire(started.elapsed(), false);
        debug!(
            tenant_id = %tenant,
            wait_ms = started.elapsed().as_millis() as u64,
            "Opened tenant handle"
        );

        lease.handle = Some(handle);
        lease.permit = Some(permit);
        lease.created_at = Instant::now();
        Ok(lease)
    }

    /// Close idle handles older than the idle timeout.
    pub async fn sweep(&self) -> SweepOutcome {
        let outcome = self.inner.sweep().await;
        if outcome.closed + outcome.abandoned > 0 {
            debug!(
                closed = outcome.closed,
                abandoned = outcome.abandoned,
                retired = outcome.retired,
                "Idle sweep finished"
            );
        }
        outcome
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until the handle or
    /// the pool is dropped.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.is_closed() {
                    break;
                }
                inner.sweep().await;
            }
            trace!("Pool sweeper stopped");
        });
        SweeperHandle { task }
    }

    /// Close every idle handle of one tenant. Returns how many were closed.
    pub async fn evict_tenant(&self, tenant: &TenantId) -> usize {
        let drained = self.inner.drain_idle(|t, _| t == tenant);
        let count = drained.len();
        self.inner.close_all(drained).await;
        self.inner.retire_empty_slots();
        if count > 0 {
            info!(tenant_id = %tenant, closed = count, "Evicted tenant handles");
        }
        count
    }

    /// Stop handing out handles and close every idle one.
    ///
    /// Leased handles are closed as they are returned.
    pub async fn shutdown(&self) -> SweepOutcome {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.capacity.close();
        let drained = self.inner.drain_idle(|_, _| true);
        let mut outcome = self.inner.close_all(drained).await;
        outcome.retired = self.inner.retire_empty_slots();
        info!(
            closed = outcome.closed,
            abandoned = outcome.abandoned,
            "Tenant pool shut down"
        );
        outcome
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Snapshot the pool statistics.
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.inner.stats.snapshot();
        stats.capacity = self.inner.config.capacity;
        stats.available = self.inner.capacity.available_permits();
        stats.tenants = self.inner.slots.read().len();
        stats
    }
}

/// Background sweep task; stops when dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper.
    pub fn stop(self) {}
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A handle leased from the pool.
///
/// Dropping it returns the handle to its tenant's idle list. A handle marked
/// broken, or one returned after shutdown, is closed instead.
pub struct PooledHandle<C: Connector> {
    handle: Option<C::Handle>,
    permit: Option<OwnedSemaphorePermit>,
    created_at: Instant,
    broken: bool,
    reserved: bool,
    _tenant_permit: OwnedSemaphorePermit,
    slot: Arc<TenantSlot<C::Handle>>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledHandle<C> {
    /// Tenant this handle belongs to.
    pub fn tenant(&self) -> &TenantId {
        &self.slot.tenant
    }

    /// How long ago the underlying handle was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark the handle unusable; it will be closed rather than reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Wait for work already submitted through this handle to finish.
    pub async fn settle(&self) -> TenantResult<()> {
        match &self.handle {
            Some(handle) => self.pool.connector.settle(handle).await,
            None => Ok(()),
        }
    }

    /// Close the handle now instead of returning it.
    pub async fn discard(mut self) {
        if let (Some(handle), Some(permit)) = (self.handle.take(), self.permit.take()) {
            self.pool.stats.leased_to_closing();
            let tenant = self.slot.tenant.clone();
            self.pool.close_handle(&tenant, handle, permit).await;
        }
    }

    fn release(&mut self, handle: C::Handle, permit: OwnedSemaphorePermit) {
        let pool = &self.pool;
        if self.broken || pool.is_closed() || !pool.connector.is_valid(&handle) {
            pool.stats.leased_to_closing();
            pool.spawn_close(self.slot.tenant.clone(), handle, permit);
            return;
        }

        let mut state = self.slot.state.lock();
        state.leased = state.leased.saturating_sub(1);
        self.reserved = false;
        if state.retired {
            drop(state);
            pool.stats.leased_to_closing();
            pool.spawn_close(self.slot.tenant.clone(), handle, permit);
            return;
        }

        let now = Instant::now();
        state.idle.push_back(PoolEntry {
            handle,
            permit,
            created_at: self.created_at,
            last_used: now,
        });
        pool.stats.leased_to_idle();
        drop(state);
        pool.released.notify_waiters();
    }
}

impl<C: Connector> Deref for PooledHandle<C> {
    type Target = C::Handle;

    // `handle` is only taken by `discard` and `drop`, which both consume
    // the wrapper, so it is present whenever a borrow is possible.
    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("handle already released")
    }
}

impl<C: Connector> DerefMut for PooledHandle<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("handle already released")
    }
}

impl<C: Connector> Drop for PooledHandle<C> {
    fn drop(&mut self) {
        if let (Some(handle), Some(permit)) = (self.handle.take(), self.permit.take()) {
            self.release(handle, permit);
        }
        if self.reserved {
            let mut state = self.slot.state.lock();
            state.leased = state.leased.saturating_sub(1);
        }
    }
}
