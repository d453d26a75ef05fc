//! Live handle to one tenant store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parish_core::error::{TenantError, TenantResult};
use parish_core::model::{ResourceId, ResourceKind};
use parish_core::tenant::{OwnershipResolver, Parent, TenantId};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{trace, warn};

use crate::error::{SqliteError, SqliteResult};

/// A connection to a tenant store, bound to the tenant it was opened for.
///
/// Every call carries the query timeout. A call that times out marks the
/// handle broken; the pool then closes it instead of handing it out again.
pub struct SqliteHandle {
    conn: Connection,
    tenant: TenantId,
    query_timeout: Duration,
    broken: AtomicBool,
}

impl std::fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHandle")
            .field("tenant", &self.tenant)
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl SqliteHandle {
    pub(crate) fn new(conn: Connection, tenant: TenantId, query_timeout: Duration) -> Self {
        Self {
            conn,
            tenant,
            query_timeout,
            broken: AtomicBool::new(false),
        }
    }

    /// Tenant whose store this handle reaches.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Whether a call timed out on this handle.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn into_inner(self) -> Connection {
        self.conn
    }

    /// Wait for every call queued on the connection thread to finish.
    ///
    /// Calls run in submission order, so a no-op queued now completes after
    /// any call that timed out earlier. Works on broken handles too.
    pub async fn settle(&self) -> SqliteResult<()> {
        self.conn.call(|_| Ok(())).await.map_err(SqliteError::from)
    }

    /// Run `f` on the store's connection thread, bounded by the query timeout.
    pub async fn call<F, R>(&self, f: F) -> SqliteResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_broken() {
            return Err(SqliteError::connection("handle is broken"));
        }
        match tokio::time::timeout(self.query_timeout, self.conn.call(f)).await {
            Ok(result) => result.map_err(SqliteError::from),
            Err(_) => {
                self.broken.store(true, Ordering::Release);
                warn!(
                    tenant_id = %self.tenant,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Store call timed out; handle will be discarded"
                );
                Err(SqliteError::Timeout(self.query_timeout))
            }
        }
    }
}

#[async_trait]
impl OwnershipResolver for SqliteHandle {
    async fn parent_of(&self, id: &ResourceId) -> TenantResult<Option<Parent>> {
        let kind = id.kind();
        let key = id.to_string();
        let sql = match kind {
            ResourceKind::Branch => "SELECT church_id FROM branches WHERE id = ?1",
            ResourceKind::Group => "SELECT branch_id FROM member_groups WHERE id = ?1",
            ResourceKind::Member => "SELECT group_id FROM members WHERE id = ?1",
        };

        let parent: Option<String> = self
            .call(move |conn| Ok(conn.query_row(sql, [key], |row| row.get(0)).optional()?))
            .await?;
        trace!(resource = %id, parent = ?parent, "Resolved parent link");

        let Some(parent) = parent else {
            return Ok(None);
        };
        let corrupt = |_: TenantError| TenantError::database(format!("corrupt parent link on {}", id));
        let parent = match kind {
            ResourceKind::Branch => Parent::Church(TenantId::parse(parent).map_err(corrupt)?),
            _ => Parent::Resource(ResourceId::parse(&parent).map_err(corrupt)?),
        };
        Ok(Some(parent))
    }
}
