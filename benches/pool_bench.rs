//! Pool and cache throughput benchmarks.
//!
//! Measures the hot path every request takes: leasing a handle for a tenant
//! and serving a list from the result cache.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench --bench pool_bench
//! cargo bench --bench pool_bench -- pool/tenants
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use parish::parish_core::cache::{CacheConfig, MemoryCache, ResultCache};
use parish::parish_core::model::{Collection, Window};
use parish::parish_core::tenant::{
    AuthorizationGuard, Authorized, Connector, Locator, MemoryRegistry, PoolConfig, Tenant,
    TenantId, TenantPoolManager, TenantStatus,
};
use parish::TenantResult;
use tokio::runtime::Runtime;

/// Connector with no I/O, so the numbers reflect pool bookkeeping only.
struct NullConnector;

#[async_trait]
impl Connector for NullConnector {
    type Handle = u64;

    async fn connect(&self, _tenant: &TenantId, _locator: &Locator) -> TenantResult<u64> {
        Ok(0)
    }

    async fn close(&self, _handle: u64) -> TenantResult<()> {
        Ok(())
    }
}

fn scopes(n: usize) -> Vec<Authorized> {
    let guard = AuthorizationGuard::new(Arc::new(MemoryRegistry::new()));
    (0..n)
        .map(|i| {
            let mut tenant = Tenant::reserved(
                TenantId::parse(format!("church-{}", i)).unwrap(),
                "bench",
                None,
            );
            tenant.status = TenantStatus::Active;
            tenant.locator = Some(Locator::new(format!("mem://{}", i)));
            guard.authorize_login(&tenant).unwrap()
        })
        .collect()
}

fn pool(capacity: usize) -> TenantPoolManager<NullConnector> {
    TenantPoolManager::new(
        NullConnector,
        PoolConfig::builder()
            .capacity(capacity)
            .max_per_tenant(capacity.min(4))
            .build(),
    )
}

fn bench_pool(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("pool");

    let manager = pool(64);
    let hot = scopes(1).remove(0);
    group.bench_function("acquire_release_single_tenant", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = manager.acquire(&hot).await.unwrap();
            black_box(*handle);
        })
    });

    // Past the capacity every acquire reclaims another tenant's idle handle.
    for tenants in [4usize, 16, 64] {
        let manager = pool(8);
        let scopes = scopes(tenants);
        let next = AtomicUsize::new(0);
        group.bench_with_input(
            BenchmarkId::new("tenants", tenants),
            &tenants,
            |b, &tenants| {
                b.to_async(&rt).iter(|| async {
                    let i = next.fetch_add(1, Ordering::Relaxed) % tenants;
                    let handle = manager.acquire(&scopes[i]).await.unwrap();
                    black_box(*handle);
                })
            },
        );
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache");
    let cache = ResultCache::new(MemoryCache::new(10_000), CacheConfig::default());
    let tenant = TenantId::parse("grace").unwrap();
    let window = Window::new(None, None);
    let page: Vec<String> = (0..50).map(|i| format!("member-{}", i)).collect();

    group.bench_function("read_through_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let hit: Vec<String> = cache
                .read_through(&tenant, Collection::Branches, window, || async {
                    Ok(page.clone())
                })
                .await
                .unwrap();
            black_box(hit);
        })
    });

    group.bench_function("invalidate_then_refill", |b| {
        b.to_async(&rt).iter(|| async {
            cache.invalidate(&tenant, &Collection::Branches).await.unwrap();
            let fresh: Vec<String> = cache
                .read_through(&tenant, Collection::Branches, window, || async {
                    Ok(page.clone())
                })
                .await
                .unwrap();
            black_box(fresh);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_pool, bench_cache);
criterion_main!(benches);
