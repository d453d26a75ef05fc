//! CLI command implementations.

pub mod config;
pub mod serve;
pub mod tenants;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use parish_core::config::{ParishConfig, StdEnvSource};
use parish_core::tenant::{ProvisioningService, TenantRegistry};
use parish_sqlite::{SqliteProvisioner, SqliteRegistry, StoreOptions};

use crate::error::CliResult;

/// Effective configuration: file, then environment overrides.
pub fn load_config(path: Option<&Path>) -> CliResult<ParishConfig> {
    Ok(ParishConfig::resolve(path, &StdEnvSource)?)
}

/// Registry plus provisioning, without the pool or the HTTP layer.
pub async fn open_provisioning(config: &ParishConfig) -> CliResult<ProvisioningService> {
    let registry: Arc<dyn TenantRegistry> =
        Arc::new(SqliteRegistry::open(&config.registry.url).await?);
    let options = StoreOptions::default().query_timeout(config.pool.query_timeout);
    let provisioner = SqliteProvisioner::new(&config.storage.data_dir, options);
    Ok(ProvisioningService::new(
        registry,
        Arc::new(provisioner),
        config.to_provision_config(),
    ))
}
