//! SQLite-backed tenant registry.
//!
//! Opened with `synchronous = FULL`, so every reservation, activation and
//! status change has reached disk before the call returns. The registry
//! database holds the `tenants` table and its migration history only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parish_core::error::{TenantError, TenantResult};
use parish_core::tenant::{
    Locator, Tenant, TenantId, TenantRegistry, TenantStatus, normalize_email,
    registry::check_transition,
};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::config::{DatabasePath, StoreOptions};
use crate::error::{SqliteError, SqliteResult};
use crate::schema::{REGISTRY_MIGRATIONS, migrate};

const SELECT_TENANT: &str =
    "SELECT id, name, admin_email, locator, status, created_at, updated_at FROM tenants";

fn conversion<E>(idx: usize) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(conversion(idx))
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    Ok(Tenant {
        id: TenantId::parse(id).map_err(conversion(0))?,
        name: row.get(1)?,
        admin_email: row.get(2)?,
        locator: row.get::<_, Option<String>>(3)?.map(Locator::new),
        status: status.parse().map_err(conversion(4))?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

/// Outcome of a conditional write, decided on the connection thread.
enum Write<T> {
    Done(T),
    Missing,
    Rejected(TenantError),
}

/// Tenant registry stored in one SQLite database.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Connection,
}

impl std::fmt::Debug for SqliteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRegistry").finish_non_exhaustive()
    }
}

impl SqliteRegistry {
    /// Open (creating if needed) the registry at `url` and apply migrations.
    pub async fn open(url: &str) -> SqliteResult<Self> {
        let conn = match DatabasePath::from_url(url)? {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Connection::open(path).await?
            }
        };
        Self::init(conn).await
    }

    /// In-memory registry, for tests.
    pub async fn memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> SqliteResult<Self> {
        let init = StoreOptions::registry().init_sql();
        let applied = conn
            .call(move |conn| {
                conn.execute_batch(&init)?;
                Ok(migrate(conn, REGISTRY_MIGRATIONS)?)
            })
            .await?;
        debug!(applied, "Registry opened");
        Ok(Self { conn })
    }

    async fn fetch(&self, id: &TenantId) -> SqliteResult<Option<Tenant>> {
        let id = id.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&format!("{} WHERE id = ?1", SELECT_TENANT), [id], tenant_from_row)
                    .optional()?)
            })
            .await?)
    }

    async fn write<T, F>(&self, id: &TenantId, f: F) -> TenantResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, Tenant) -> rusqlite::Result<Write<T>> + Send + 'static,
        T: Send + 'static,
    {
        let key = id.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current = tx
                    .query_row(&format!("{} WHERE id = ?1", SELECT_TENANT), [&key], tenant_from_row)
                    .optional()?;
                let outcome = match current {
                    Some(tenant) => f(&tx, tenant)?,
                    None => Write::Missing,
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(SqliteError::from)?;

        match outcome {
            Write::Done(value) => Ok(value),
            Write::Missing => Err(TenantError::tenant_not_found(id.as_str())),
            Write::Rejected(err) => Err(err),
        }
    }
}

#[async_trait]
impl TenantRegistry for SqliteRegistry {
    async fn reserve(
        &self,
        id: &TenantId,
        name: &str,
        admin_email: Option<&str>,
    ) -> TenantResult<Tenant> {
        let tenant = Tenant::reserved(id.clone(), name, admin_email.map(str::to_string));
        let row = tenant.clone();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let taken: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM tenants WHERE id = ?1)",
                    [row.id.as_str()],
                    |r| r.get(0),
                )?;
                if taken {
                    return Ok(Write::Rejected(TenantError::tenant_already_exists(
                        row.id.as_str(),
                    )));
                }
                if let Some(email) = row.admin_email.as_deref() {
                    let used: bool = tx.query_row(
                        "SELECT EXISTS (SELECT 1 FROM tenants WHERE admin_email = ?1)",
                        [email],
                        |r| r.get(0),
                    )?;
                    if used {
                        return Ok(Write::Rejected(TenantError::conflict(
                            "An account with this email already exists",
                        )));
                    }
                }
                tx.execute(
                    "INSERT INTO tenants (id, name, admin_email, locator, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6)",
                    params![
                        row.id.as_str(),
                        row.name,
                        row.admin_email,
                        row.status.as_str(),
                        row.created_at.to_rfc3339(),
                        row.updated_at.to_rfc3339()
                    ],
                )?;
                tx.commit()?;
                Ok(Write::Done(()))
            })
            .await
            .map_err(SqliteError::from)?;

        match outcome {
            Write::Done(()) => {
                debug!(tenant_id = %id, "Tenant reserved");
                Ok(tenant)
            }
            Write::Missing => Err(TenantError::tenant_not_found(id.as_str())),
            Write::Rejected(err) => Err(err),
        }
    }

    async fn activate(&self, id: &TenantId, locator: Locator) -> TenantResult<Tenant> {
        let tenant = self
            .write(id, move |tx, mut tenant| {
                if tenant.status != TenantStatus::Provisioning {
                    return Ok(Write::Rejected(TenantError::tenant_already_exists(
                        tenant.id.as_str(),
                    )));
                }
                tenant.locator = Some(locator);
                tenant.status = TenantStatus::Active;
                tenant.updated_at = Utc::now();
                tx.execute(
                    "UPDATE tenants SET locator = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                    params![
                        tenant.id.as_str(),
                        tenant.locator.as_ref().map(|l| l.as_str()),
                        tenant.status.as_str(),
                        tenant.updated_at.to_rfc3339()
                    ],
                )?;
                Ok(Write::Done(tenant))
            })
            .await?;
        info!(tenant_id = %id, "Tenant activated");
        Ok(tenant)
    }

    async fn abandon(&self, id: &TenantId) -> TenantResult<()> {
        let key = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM tenants WHERE id = ?1 AND status = 'provisioning'",
                    [key],
                )?)
            })
            .await
            .map_err(SqliteError::from)?;
        if removed > 0 {
            debug!(tenant_id = %id, "Tenant reservation abandoned");
        }
        Ok(())
    }

    async fn get(&self, id: &TenantId) -> TenantResult<Option<Tenant>> {
        Ok(self.fetch(id).await?)
    }

    async fn find_by_admin_email(&self, email: &str) -> TenantResult<Option<Tenant>> {
        let email = normalize_email(email);
        let tenant = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("{} WHERE admin_email = ?1", SELECT_TENANT),
                        [email],
                        tenant_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(tenant)
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenantResult<Tenant> {
        let tenant = self
            .write(id, move |tx, mut tenant| {
                if let Err(e) = check_transition(&tenant, status) {
                    return Ok(Write::Rejected(e));
                }
                tenant.status = status;
                tenant.updated_at = Utc::now();
                tx.execute(
                    "UPDATE tenants SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![
                        tenant.id.as_str(),
                        tenant.status.as_str(),
                        tenant.updated_at.to_rfc3339()
                    ],
                )?;
                Ok(Write::Done(tenant))
            })
            .await?;
        info!(tenant_id = %id, status = %status, "Tenant status changed");
        Ok(tenant)
    }

    async fn list(&self) -> TenantResult<Vec<Tenant>> {
        let tenants = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_TENANT))?;
                let tenants = stmt
                    .query_map([], tenant_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tenants)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(tenants)
    }

    async fn purge(&self, id: &TenantId) -> TenantResult<Tenant> {
        self.write(id, |tx, tenant| {
            tx.execute("DELETE FROM tenants WHERE id = ?1", [tenant.id.as_str()])?;
            Ok(Write::Done(tenant))
        })
        .await
    }
}
