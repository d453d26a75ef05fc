//! Tenant store operations: branches, groups, members and administrators.
//!
//! Every operation runs through one [`SqliteHandle`], which only ever reaches
//! the store of the tenant it was opened for. Ownership checks happen before
//! these calls (see `AuthorizationGuard::confirm`); the queries here still
//! filter by parent so a mismatched id simply finds nothing.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parish_core::error::{TenantError, TenantResult};
use parish_core::import::{self, ImportReport};
use parish_core::model::{
    Admin, AdminCredentials, Branch, Group, Member, NewMember, Page, ResourceId, ResourceKind,
    Window,
};
use parish_core::tenant::{SeedAdmin, TenantId, normalize_email};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::handle::SqliteHandle;

fn parse_col<T, E>(row: &Row<'_>, idx: usize, parse: impl FnOnce(String) -> Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_col(row, idx, |s| {
        DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc))
    })
}

fn resource_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<ResourceId> {
    parse_col(row, idx, |s| ResourceId::parse(&s))
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: resource_id(row, 0)?,
        church_id: parse_col(row, 1, |s| TenantId::parse(s))?,
        name: row.get(2)?,
        created_at: timestamp(row, 3)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: resource_id(row, 0)?,
        branch_id: resource_id(row, 1)?,
        name: row.get(2)?,
        created_at: timestamp(row, 3)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: resource_id(row, 0)?,
        group_id: resource_id(row, 1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        created_at: timestamp(row, 5)?,
    })
}

fn fetch_page<T>(
    conn: &Connection,
    count_sql: &str,
    list_sql: &str,
    parent: &str,
    window: Window,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Page<T>> {
    let total: i64 = conn.query_row(count_sql, [parent], |row| row.get(0))?;
    let mut stmt = conn.prepare(list_sql)?;
    let items = stmt
        .query_map(params![parent, window.limit, window.offset], map)?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(Page::new(items, total.max(0) as u64, window))
}

fn checked_name(field: &str, value: &str) -> TenantResult<String> {
    import::validate_name(field, value).map_err(|msg| TenantError::invalid_input(field, msg))
}

fn phones_in(conn: &Connection, group: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT phone FROM members WHERE group_id = ?1")?;
    let phones = stmt
        .query_map([group], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(phones)
}

/// Insert an administrator. Used while seeding a new store.
pub(crate) fn insert_admin(conn: &Connection, seed: &SeedAdmin) -> rusqlite::Result<Admin> {
    let admin = Admin {
        id: uuid::Uuid::new_v4().to_string(),
        email: normalize_email(&seed.email),
        name: seed.name.clone(),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO admins (id, email, name, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            admin.id,
            admin.email,
            admin.name,
            seed.password_hash,
            admin.created_at.to_rfc3339()
        ],
    )?;
    Ok(admin)
}

impl SqliteHandle {
    /// Create a branch of the church.
    pub async fn create_branch(&self, name: &str) -> TenantResult<Branch> {
        let branch = Branch {
            id: ResourceId::generate(ResourceKind::Branch, self.tenant()),
            church_id: self.tenant().clone(),
            name: checked_name("name", name)?,
            created_at: Utc::now(),
        };
        let row = branch.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO branches (id, church_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.church_id.as_str(),
                    row.name,
                    row.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        debug!(tenant_id = %self.tenant(), branch = %branch.id, "Branch created");
        Ok(branch)
    }

    /// List the church's branches.
    pub async fn list_branches(&self, window: Window) -> TenantResult<Page<Branch>> {
        let church = self.tenant().to_string();
        let page = self
            .call(move |conn| {
                Ok(fetch_page(
                    conn,
                    "SELECT COUNT(*) FROM branches WHERE church_id = ?1",
                    "SELECT id, church_id, name, created_at FROM branches
                     WHERE church_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
                    &church,
                    window,
                    branch_from_row,
                )?)
            })
            .await?;
        Ok(page)
    }

    /// Create a group inside `branch`.
    pub async fn create_group(&self, branch: &ResourceId, name: &str) -> TenantResult<Group> {
        let group = Group {
            id: ResourceId::generate(ResourceKind::Group, self.tenant()),
            branch_id: branch.clone(),
            name: checked_name("name", name)?,
            created_at: Utc::now(),
        };
        let row = group.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO member_groups (id, branch_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.branch_id.to_string(),
                    row.name,
                    row.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        debug!(tenant_id = %self.tenant(), group = %group.id, "Group created");
        Ok(group)
    }

    /// List the groups of `branch`.
    pub async fn list_groups(&self, branch: &ResourceId, window: Window) -> TenantResult<Page<Group>> {
        let branch = branch.to_string();
        let page = self
            .call(move |conn| {
                Ok(fetch_page(
                    conn,
                    "SELECT COUNT(*) FROM member_groups WHERE branch_id = ?1",
                    "SELECT id, branch_id, name, created_at FROM member_groups
                     WHERE branch_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
                    &branch,
                    window,
                    group_from_row,
                )?)
            })
            .await?;
        Ok(page)
    }

    /// Add one member to `group`.
    ///
    /// Fails with `Conflict` if the phone is already used in the group.
    pub async fn add_member(&self, group: &ResourceId, new: NewMember) -> TenantResult<Member> {
        let phone = import::normalize_phone(&new.phone)
            .ok_or_else(|| TenantError::invalid_input("phone", format!("invalid phone '{}'", new.phone)))?;
        let member = Member {
            id: ResourceId::generate(ResourceKind::Member, self.tenant()),
            group_id: group.clone(),
            first_name: checked_name("firstName", &new.first_name)?,
            last_name: checked_name("lastName", &new.last_name)?,
            phone,
            created_at: Utc::now(),
        };
        let row = member.clone();
        let result = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO members (id, group_id, first_name, last_name, phone, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id.to_string(),
                        row.group_id.to_string(),
                        row.first_name,
                        row.last_name,
                        row.phone,
                        row.created_at.to_rfc3339()
                    ],
                )?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => Ok(member),
            Err(e) if e.is_constraint_violation() => Err(TenantError::conflict(format!(
                "A member with phone {} already exists in this group",
                member.phone
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// List the members of `group`, oldest first.
    pub async fn list_members(&self, group: &ResourceId, window: Window) -> TenantResult<Page<Member>> {
        let group = group.to_string();
        let page = self
            .call(move |conn| {
                Ok(fetch_page(
                    conn,
                    "SELECT COUNT(*) FROM members WHERE group_id = ?1",
                    "SELECT id, group_id, first_name, last_name, phone, created_at FROM members
                     WHERE group_id = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
                    &group,
                    window,
                    member_from_row,
                )?)
            })
            .await?;
        Ok(page)
    }

    /// Delete `member` from `group`.
    pub async fn delete_member(&self, group: &ResourceId, member: &ResourceId) -> TenantResult<()> {
        let (group_key, member_key) = (group.to_string(), member.to_string());
        let deleted = self
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM members WHERE id = ?1 AND group_id = ?2",
                    params![member_key, group_key],
                )?)
            })
            .await?;
        if deleted == 0 {
            return Err(TenantError::not_found(member.to_string()));
        }
        debug!(tenant_id = %self.tenant(), member = %member, "Member deleted");
        Ok(())
    }

    /// Validate a CSV upload and insert its valid rows into `group` in one
    /// transaction.
    pub async fn import_members(&self, group: &ResourceId, csv: String) -> TenantResult<ImportReport> {
        let tenant = self.tenant().clone();
        let group = group.clone();
        let group_key = group.to_string();

        let report = self
            .call(move |conn| {
                let existing = phones_in(conn, &group_key)?;
                let plan = match import::plan_import(&csv, &existing) {
                    Ok(plan) => plan,
                    Err(e) => return Ok(Err(e)),
                };

                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO members (id, group_id, first_name, last_name, phone, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    let now = Utc::now().to_rfc3339();
                    for member in plan.members() {
                        let id = ResourceId::generate(ResourceKind::Member, &tenant);
                        stmt.execute(params![
                            id.to_string(),
                            group_key,
                            member.first_name,
                            member.last_name,
                            member.phone,
                            now
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(Ok(plan.into_report()))
            })
            .await??;

        info!(
            tenant_id = %self.tenant(),
            group = %group,
            imported = report.imported,
            failed = report.failed,
            "Members imported"
        );
        Ok(report)
    }

    /// Look up an administrator and its password hash by email.
    pub async fn find_admin(&self, email: &str) -> TenantResult<Option<AdminCredentials>> {
        let email = normalize_email(email);
        let found = self
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, email, name, created_at, password_hash FROM admins WHERE email = ?1",
                        [email],
                        |row| {
                            Ok(AdminCredentials {
                                admin: Admin {
                                    id: row.get(0)?,
                                    email: row.get(1)?,
                                    name: row.get(2)?,
                                    created_at: timestamp(row, 3)?,
                                },
                                password_hash: row.get(4)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        Ok(found)
    }
}
