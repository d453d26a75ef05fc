//! Shared application state.

use std::sync::Arc;

use axum::extract::FromRef;
use parish_core::cache::{MemoryCache, ResultCache};
use parish_core::config::ParishConfig;
use parish_core::coordinator::MutationCoordinator;
use parish_core::error::{TenantError, TenantResult};
use parish_core::tenant::{
    AuthorizationGuard, ProvisioningService, TenantPoolManager, TenantRegistry,
};
use parish_sqlite::{SqliteConnector, SqliteProvisioner, SqliteRegistry, StoreOptions};
use tracing::info;

use crate::auth::TokenService;

/// Coordinator over SQLite tenant stores.
pub type Coordinator = MutationCoordinator<SqliteConnector>;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn TenantRegistry>,
    pub provisioning: ProvisioningService,
    pub coordinator: Coordinator,
    pub tokens: Arc<TokenService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("provisioning", &self.provisioning)
            .field("coordinator", &"MutationCoordinator")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.tokens)
    }
}

impl AppState {
    /// Open the registry and wire up every component from `config`.
    pub async fn open(config: &ParishConfig) -> TenantResult<Self> {
        config.validate()?;
        let secret = config
            .auth
            .jwt_secret
            .as_deref()
            .ok_or_else(|| TenantError::config("auth.jwt_secret is required"))?;

        let registry: Arc<dyn TenantRegistry> =
            Arc::new(SqliteRegistry::open(&config.registry.url).await?);
        let options = StoreOptions::default().query_timeout(config.pool.query_timeout);
        let provisioner = SqliteProvisioner::new(&config.storage.data_dir, options.clone());
        let provisioning = ProvisioningService::new(
            Arc::clone(&registry),
            Arc::new(provisioner),
            config.to_provision_config(),
        );

        let pool = TenantPoolManager::new(SqliteConnector::new(options), config.to_pool_config());
        let cache = ResultCache::new(
            MemoryCache::new(config.cache.max_entries),
            config.to_cache_config(),
        );
        let coordinator = MutationCoordinator::new(
            AuthorizationGuard::new(Arc::clone(&registry)),
            pool,
            Arc::new(cache),
            config.to_coordinator_config(),
        );
        let tokens = TokenService::new(secret.as_bytes(), &config.auth.issuer, config.auth.token_ttl);

        info!(
            registry = %config.registry.url,
            data_dir = %config.storage.data_dir.display(),
            capacity = config.pool.capacity,
            "Application state ready"
        );
        Ok(Self {
            registry,
            provisioning,
            coordinator,
            tokens: Arc::new(tokens),
        })
    }
}
