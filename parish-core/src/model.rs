//! Tenant-owned domain records and resource identity.
//!
//! Every branch, group and member id embeds its owning tenant:
//! `br.grace.5f0c...`, `grp.grace.91aa...`, `mbr.grace.0d3e...`. Ownership is
//! therefore fixed at creation and readable without touching any store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TenantError, TenantResult};
use crate::tenant::TenantId;

/// Kind of tenant-owned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A church branch.
    Branch,
    /// A group within a branch.
    Group,
    /// A member of a group.
    Member,
}

impl ResourceKind {
    /// Id prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Branch => "br",
            Self::Group => "grp",
            Self::Member => "mbr",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Branch => "Branch",
            Self::Group => "Group",
            Self::Member => "Member",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "br" => Some(Self::Branch),
            "grp" => Some(Self::Group),
            "mbr" => Some(Self::Member),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a tenant-owned resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    kind: ResourceKind,
    tenant: TenantId,
    key: String,
}

impl ResourceId {
    /// Mint a fresh id owned by `tenant`.
    pub fn generate(kind: ResourceKind, tenant: &TenantId) -> Self {
        Self {
            kind,
            tenant: tenant.clone(),
            key: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Parse a rendered id.
    pub fn parse(s: &str) -> TenantResult<Self> {
        let mut parts = s.splitn(3, '.');
        let (Some(prefix), Some(tenant), Some(key)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(s));
        };
        let kind = ResourceKind::from_prefix(prefix).ok_or_else(|| malformed(s))?;
        let tenant = TenantId::parse(tenant).map_err(|_| malformed(s))?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed(s));
        }
        Ok(Self {
            kind,
            tenant,
            key: key.to_string(),
        })
    }

    /// Parse and require a specific kind.
    pub fn parse_kind(s: &str, kind: ResourceKind) -> TenantResult<Self> {
        let id = Self::parse(s)?;
        if id.kind != kind {
            return Err(malformed(s));
        }
        Ok(id)
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Owning tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

fn malformed(s: &str) -> TenantError {
    TenantError::invalid_input("id", format!("'{}' is not a valid resource id", s))
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind.prefix(), self.tenant, self.key)
    }
}

impl FromStr for ResourceId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = TenantError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// A church branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: ResourceId,
    pub church_id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A group inside a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: ResourceId,
    pub branch_id: ResourceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: ResourceId,
    pub group_id: ResourceId,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

/// A member to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// A tenant administrator as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// An administrator with its stored password hash.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub admin: Admin,
    pub password_hash: String,
}

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: u32 = 500;
/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub offset: u32,
    pub limit: u32,
}

impl Window {
    /// Build a window, clamping the limit into `1..=MAX_PAGE_LIMIT`.
    pub fn new(offset: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset, self.limit)
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Assemble a page for `window`.
    pub fn new(items: Vec<T>, total: u64, window: Window) -> Self {
        Self {
            items,
            total,
            offset: window.offset,
            limit: window.limit,
        }
    }
}

/// A cached collection within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    /// All branches of the church.
    Branches,
    /// Groups of one branch.
    Groups(ResourceId),
    /// Members of one group.
    Members(ResourceId),
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branches => f.write_str("branches"),
            Self::Groups(branch) => write!(f, "groups:{}", branch),
            Self::Members(group) => write!(f, "members:{}", group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resource_id_carries_owner() {
        let tenant = TenantId::parse("grace").unwrap();
        let id = ResourceId::generate(ResourceKind::Group, &tenant);
        let rendered = id.to_string();
        assert!(rendered.starts_with("grp.grace."));

        let parsed = ResourceId::parse(&rendered).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.tenant(), &tenant);
        assert_eq!(parsed.kind(), ResourceKind::Group);
    }

    #[test]
    fn test_resource_id_rejects_garbage() {
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("grp.grace").is_err());
        assert!(ResourceId::parse("xyz.grace.abc").is_err());
        assert!(ResourceId::parse("grp.gr ace.abc").is_err());
        assert!(ResourceId::parse("grp.grace.a-b").is_err());
        assert!(ResourceId::parse("42").is_err());
    }

    #[test]
    fn test_parse_kind_mismatch() {
        let tenant = TenantId::parse("grace").unwrap();
        let id = ResourceId::generate(ResourceKind::Branch, &tenant).to_string();
        assert!(ResourceId::parse_kind(&id, ResourceKind::Group).is_err());
        assert!(ResourceId::parse_kind(&id, ResourceKind::Branch).is_ok());
    }

    #[test]
    fn test_window_clamps() {
        assert_eq!(Window::new(None, None).limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(Window::new(Some(5), Some(0)).limit, 1);
        assert_eq!(Window::new(None, Some(50_000)).limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_collection_names() {
        let tenant = TenantId::parse("grace").unwrap();
        let group = ResourceId::generate(ResourceKind::Group, &tenant);
        assert_eq!(Collection::Branches.to_string(), "branches");
        assert_eq!(
            Collection::Members(group.clone()).to_string(),
            format!("members:{}", group)
        );
    }
}
