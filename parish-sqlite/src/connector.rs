//! Opens and closes tenant store handles for the pool.

use std::path::Path;

use async_trait::async_trait;
use parish_core::error::{TenantError, TenantResult};
use parish_core::tenant::{Connector, Locator, TenantId};
use rusqlite::OpenFlags;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::StoreOptions;
use crate::error::SqliteError;
use crate::handle::SqliteHandle;
use crate::schema::{META_OWNER, META_READY, read_meta};

/// [`Connector`] for file-backed tenant stores.
///
/// Only opens stores that already exist and whose owner tag matches the
/// tenant being connected, so a wrong or stale locator can never expose
/// another tenant's data.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    options: StoreOptions,
}

impl SqliteConnector {
    /// Create a connector applying `options` to every handle.
    pub fn new(options: StoreOptions) -> Self {
        Self { options }
    }

    /// Options applied on connect.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Handle = SqliteHandle;

    async fn connect(&self, tenant: &TenantId, locator: &Locator) -> TenantResult<SqliteHandle> {
        let path = Path::new(locator.as_str());
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TenantError::connection(format!("store for {} is missing", tenant))
                .with_tenant(tenant.as_str()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
        .map_err(SqliteError::from)?;

        let init = self.options.init_sql();
        let (owner, ready) = conn
            .call(move |conn| {
                conn.execute_batch(&init)?;
                Ok((read_meta(conn, META_OWNER)?, read_meta(conn, META_READY)?))
            })
            .await
            .map_err(SqliteError::from)?;

        if owner.as_deref() != Some(tenant.as_str()) || ready.as_deref() != Some("1") {
            warn!(
                tenant_id = %tenant,
                owner = owner.as_deref().unwrap_or("none"),
                "Store tag does not match tenant; refusing to connect"
            );
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Closing rejected store failed");
            }
            return Err(TenantError::connection(format!("store for {} is not usable", tenant))
                .with_tenant(tenant.as_str()));
        }

        debug!(tenant_id = %tenant, "Store opened");
        Ok(SqliteHandle::new(conn, tenant.clone(), self.options.query_timeout))
    }

    async fn close(&self, handle: SqliteHandle) -> TenantResult<()> {
        let tenant = handle.tenant().clone();
        handle
            .into_inner()
            .close()
            .await
            .map_err(|e| TenantError::connection(format!("closing store for {}: {}", tenant, e)))
    }

    fn is_valid(&self, handle: &SqliteHandle) -> bool {
        !handle.is_broken()
    }

    async fn settle(&self, handle: &SqliteHandle) -> TenantResult<()> {
        handle.settle().await.map_err(TenantError::from)
    }
}
