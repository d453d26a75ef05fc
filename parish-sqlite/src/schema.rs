//! Schemas and migrations for the registry and tenant stores.
//!
//! Applied migrations are tracked in `_parish_migrations`. Every tenant store
//! also carries a `_parish_meta` table whose `owner` entry tags the store with
//! the tenant it was provisioned for; connections and the orphan sweep read
//! it back.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// One forward-only schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Stable id, ordered lexically.
    pub id: &'static str,
    /// SQL applied in one transaction with its history row.
    pub sql: &'static str,
}

/// Migration history table.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _parish_migrations (
    id TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Registry schema: tenant metadata only.
pub const REGISTRY_MIGRATIONS: &[Migration] = &[Migration {
    id: "0001_tenants",
    sql: r#"
CREATE TABLE tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    admin_email TEXT UNIQUE,
    locator TEXT UNIQUE,
    status TEXT NOT NULL CHECK (status IN ('provisioning', 'active', 'disabled')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX tenants_status_idx ON tenants (status);
"#,
}];

/// Tenant store schema.
pub const STORE_MIGRATIONS: &[Migration] = &[
    Migration {
        id: "0001_meta",
        sql: r#"
CREATE TABLE _parish_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#,
    },
    Migration {
        id: "0002_admins",
        sql: r#"
CREATE TABLE admins (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#,
    },
    Migration {
        id: "0003_hierarchy",
        sql: r#"
CREATE TABLE branches (
    id TEXT PRIMARY KEY,
    church_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE member_groups (
    id TEXT PRIMARY KEY,
    branch_id TEXT NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX member_groups_branch_idx ON member_groups (branch_id);
CREATE TABLE members (
    id TEXT PRIMARY KEY,
    group_id TEXT NOT NULL REFERENCES member_groups (id) ON DELETE CASCADE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    phone TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (group_id, phone)
);
CREATE INDEX members_group_idx ON members (group_id);
"#,
    },
];

/// Meta key holding the owning tenant id.
pub const META_OWNER: &str = "owner";
/// Meta key set once schema and seed data are complete.
pub const META_READY: &str = "ready";
/// Meta key holding the provisioning time.
pub const META_CREATED_AT: &str = "created_at";

/// Apply pending migrations. Returns how many were applied.
pub fn migrate(conn: &mut Connection, migrations: &[Migration]) -> rusqlite::Result<usize> {
    conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
    let mut applied = 0;
    for migration in migrations {
        let done: Option<String> = conn
            .query_row(
                "SELECT id FROM _parish_migrations WHERE id = ?1",
                [migration.id],
                |row| row.get(0),
            )
            .optional()?;
        if done.is_some() {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO _parish_migrations (id, applied_at) VALUES (?1, ?2)",
            params![migration.id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!(migration = migration.id, "Migration applied");
        applied += 1;
    }
    Ok(applied)
}

/// Ids of applied migrations, in order.
pub fn applied(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM _parish_migrations ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Write a store meta entry.
pub fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO _parish_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Read a store meta entry. Missing table or key reads as `None`.
pub fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_parish_meta')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(None);
    }
    conn.query_row(
        "SELECT value FROM _parish_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}
