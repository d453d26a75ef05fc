//! File-backed tenant stores.
//!
//! Each store is one SQLite file `{data_dir}/{tenant}-{uuid}.sqlite3`. The
//! random suffix means a retried or concurrent provisioning never reuses an
//! existing file. A store is tagged with its owner before seeding and marked
//! ready last, so a half-built store is never mistaken for a usable one.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use parish_core::error::{TenantError, TenantResult};
use parish_core::tenant::{Locator, Provisioner, SeedAdmin, StoreInfo, TenantId};
use rusqlite::OpenFlags;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::StoreOptions;
use crate::error::SqliteError;
use crate::schema::{META_CREATED_AT, META_OWNER, META_READY, STORE_MIGRATIONS, migrate, read_meta, write_meta};
use crate::store::insert_admin;

/// Extension of tenant store files.
pub const STORE_EXTENSION: &str = "sqlite3";

const SIDECARS: [&str; 2] = ["-wal", "-shm"];

/// [`Provisioner`] that creates one SQLite file per tenant under a data
/// directory.
#[derive(Debug, Clone)]
pub struct SqliteProvisioner {
    data_dir: PathBuf,
    options: StoreOptions,
}

impl SqliteProvisioner {
    /// Provision stores under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            data_dir: data_dir.into(),
            options,
        }
    }

    /// Directory holding the stores.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn store_path(&self, tenant: &TenantId) -> PathBuf {
        self.data_dir.join(format!(
            "{}-{}.{}",
            tenant,
            uuid::Uuid::new_v4().simple(),
            STORE_EXTENSION
        ))
    }

    async fn build(&self, path: &Path, tenant: &TenantId, admin: &SeedAdmin) -> Result<(), SqliteError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await?;

        let init = self.options.init_sql();
        let owner = tenant.to_string();
        let admin = admin.clone();
        let built = conn
            .call(move |conn| {
                conn.execute_batch(&init)?;
                migrate(conn, STORE_MIGRATIONS)?;
                let tx = conn.transaction()?;
                write_meta(&tx, META_OWNER, &owner)?;
                write_meta(&tx, META_CREATED_AT, &Utc::now().to_rfc3339())?;
                insert_admin(&tx, &admin)?;
                tx.commit()?;
                write_meta(conn, META_READY, "1")?;
                Ok(())
            })
            .await;

        if let Err(e) = conn.close().await {
            debug!(error = %e, "Closing new store failed");
        }
        Ok(built?)
    }
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_with_sidecars(path: &Path) -> std::io::Result<()> {
    remove_file(path)?;
    for suffix in SIDECARS {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        remove_file(Path::new(&sidecar))?;
    }
    Ok(())
}

fn inspect(path: &Path) -> StoreInfo {
    let age = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO);

    let tags = rusqlite::Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .and_then(|conn| Ok((read_meta(&conn, META_OWNER)?, read_meta(&conn, META_READY)?)));

    let (owner, ready) = match tags {
        Ok(tags) => tags,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Store tag unreadable");
            (None, None)
        }
    };

    StoreInfo {
        locator: Locator::new(path.to_string_lossy()),
        owner: owner.and_then(|o| TenantId::parse(o).ok()),
        ready: ready.as_deref() == Some("1"),
        age,
    }
}

#[async_trait]
impl Provisioner for SqliteProvisioner {
    async fn create_store(&self, tenant: &TenantId, admin: &SeedAdmin) -> TenantResult<Locator> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| TenantError::from(SqliteError::from(e)))?;

        let path = self.store_path(tenant);
        if let Err(e) = self.build(&path, tenant, admin).await {
            warn!(tenant_id = %tenant, path = %path.display(), error = %e, "Store creation failed");
            if let Err(e) = remove_with_sidecars(&path) {
                warn!(path = %path.display(), error = %e, "Removing partial store failed");
            }
            return Err(e.into());
        }

        info!(tenant_id = %tenant, path = %path.display(), "Store created");
        Ok(Locator::new(path.to_string_lossy()))
    }

    async fn remove_store(&self, locator: &Locator) -> TenantResult<()> {
        let path = PathBuf::from(locator.as_str());
        tokio::task::spawn_blocking(move || remove_with_sidecars(&path))
            .await
            .map_err(|e| TenantError::internal(format!("store removal task failed: {}", e)))?
            .map_err(|e| TenantError::from(SqliteError::from(e)))?;
        debug!(locator = %locator, "Store removed");
        Ok(())
    }

    async fn list_stores(&self) -> TenantResult<Vec<StoreInfo>> {
        let dir = self.data_dir.clone();
        let stores = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<StoreInfo>> {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let mut paths = Vec::new();
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(STORE_EXTENSION) {
                    paths.push(path);
                }
            }
            paths.sort();
            Ok(paths.iter().map(|p| inspect(p)).collect())
        })
        .await
        .map_err(|e| TenantError::internal(format!("store scan task failed: {}", e)))?
        .map_err(|e| TenantError::from(SqliteError::from(e)))?;
        Ok(stores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::applied;
    use pretty_assertions::assert_eq;

    fn admin() -> SeedAdmin {
        SeedAdmin {
            email: "Pastor@Grace.org".into(),
            name: "Pastor".into(),
            password_hash: "$argon2id$stub".into(),
        }
    }

    #[tokio::test]
    async fn test_create_store_is_tagged_and_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path().join("tenants"), StoreOptions::default());
        let tenant = TenantId::parse("grace").unwrap();

        let locator = provisioner.create_store(&tenant, &admin()).await.unwrap();
        assert!(locator.as_str().ends_with(".sqlite3"));

        let conn = rusqlite::Connection::open(locator.as_str()).unwrap();
        assert_eq!(read_meta(&conn, META_OWNER).unwrap().as_deref(), Some("grace"));
        assert_eq!(read_meta(&conn, META_READY).unwrap().as_deref(), Some("1"));
        assert_eq!(applied(&conn).unwrap().len(), STORE_MIGRATIONS.len());
        let email: String = conn
            .query_row("SELECT email FROM admins", [], |row| row.get(0))
            .unwrap();
        assert_eq!(email, "pastor@grace.org");
    }

    #[tokio::test]
    async fn test_each_store_gets_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path(), StoreOptions::default());
        let tenant = TenantId::parse("grace").unwrap();

        let first = provisioner.create_store(&tenant, &admin()).await.unwrap();
        let second = provisioner.create_store(&tenant, &admin()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(provisioner.list_stores().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_and_remove_stores() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path(), StoreOptions::default());
        let tenant = TenantId::parse("grace").unwrap();
        let locator = provisioner.create_store(&tenant, &admin()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("junk.sqlite3"), "not a database").unwrap();

        let stores = provisioner.list_stores().await.unwrap();
        assert_eq!(stores.len(), 2);
        let ours = stores.iter().find(|s| s.locator == locator).unwrap();
        assert_eq!(ours.owner.as_ref(), Some(&tenant));
        assert!(ours.ready);
        let junk = stores.iter().find(|s| s.locator != locator).unwrap();
        assert_eq!(junk.owner, None);
        assert!(!junk.ready);

        provisioner.remove_store(&locator).await.unwrap();
        provisioner.remove_store(&locator).await.unwrap();
        assert_eq!(provisioner.list_stores().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_data_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path().join("absent"), StoreOptions::default());
        assert!(provisioner.list_stores().await.unwrap().is_empty());
    }
}
