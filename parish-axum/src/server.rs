//! Serving the router until shutdown.

use std::future::Future;

use parish_core::config::ParishConfig;
use parish_core::error::{TenantError, TenantResult};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::router;
use crate::state::AppState;

/// Serve `state` on `listener` until `shutdown` resolves, then drain the pool.
pub async fn serve_with_shutdown<F>(state: AppState, listener: TcpListener, shutdown: F) -> TenantResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pool = state.coordinator.pool().clone();
    let sweeper = pool.spawn_sweeper();

    let addr = listener
        .local_addr()
        .map_err(|e| TenantError::internal(format!("listener has no address: {}", e)))?;
    info!(addr = %addr, "Listening");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    sweeper.stop();
    let outcome = pool.shutdown().await;
    let stats = pool.stats();
    info!(
        closed = outcome.closed,
        abandoned = outcome.abandoned,
        potential_leaks = stats.potential_leaks,
        "Pool drained"
    );
    served.map_err(|e| TenantError::internal(format!("server error: {}", e)))
}

/// Open everything `config` describes and serve until Ctrl-C.
pub async fn run(config: &ParishConfig) -> TenantResult<()> {
    let state = AppState::open(config).await?;

    match state.provisioning.sweep_orphans().await {
        Ok(report) => info!(
            scanned = report.scanned,
            removed = report.removed,
            stale_reservations = report.stale_reservations,
            "Startup orphan sweep finished"
        ),
        Err(e) => warn!(error = %e, "Startup orphan sweep failed"),
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| TenantError::config(format!("cannot bind {}: {}", config.server.bind, e)))?;
    serve_with_shutdown(state, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
