//! `GET /health`

use axum::Json;
use axum::extract::State;
use parish_core::cache::CacheStats;
use parish_core::tenant::PoolStats;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TenantCounts {
    /// Tenants holding at least one live handle.
    pub cached: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pool: PoolStats,
    pub tenants: TenantCounts,
    pub cache: CacheStats,
}

/// Liveness plus pool and cache counters. Never touches a tenant store.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.coordinator.pool().stats();
    let status = if state.coordinator.pool().is_closed() {
        "closing"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        tenants: TenantCounts {
            cached: pool.tenants,
        },
        pool,
        cache: state.coordinator.cache().stats(),
    })
}
