//! Tenant identity, status and registry record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TenantError, TenantResult};

/// Maximum length of a tenant id.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// A unique identifier for a tenant (a church).
///
/// Ids are restricted to ASCII letters, digits, `-` and `_` so they can be
/// embedded in resource ids and store file names without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id.
    pub fn parse(id: impl Into<String>) -> TenantResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TenantError::invalid_tenant_id(id, "must not be empty"));
        }
        if id.len() > MAX_TENANT_ID_LEN {
            return Err(TenantError::invalid_tenant_id(
                id,
                format!("must be at most {} characters", MAX_TENANT_ID_LEN),
            ));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TenantError::invalid_tenant_id(
                id.clone(),
                format!("contains invalid character '{}'", c),
            ));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random tenant id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Reserved; the store is being created and has no locator yet.
    Provisioning,
    /// Store is ready and the tenant may be served.
    Active,
    /// Disabled by an administrator.
    Disabled,
}

impl TenantStatus {
    /// Stable lowercase name, as stored in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(TenantError::database(format!(
                "unknown tenant status '{}'",
                other
            ))),
        }
    }
}

/// Where a tenant's private store lives (a path or connection URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Wrap a locator string.
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// Get the locator as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Tenant id.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Email of the founding administrator, used to route logins.
    pub admin_email: Option<String>,
    /// Store locator; absent while provisioning.
    pub locator: Option<Locator>,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// A fresh reservation in `provisioning` status.
    pub fn reserved(id: TenantId, name: impl Into<String>, admin_email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            admin_email: admin_email.map(|e| normalize_email(&e)),
            locator: None,
            status: TenantStatus::Provisioning,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether requests may be served for this tenant.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active && self.locator.is_some()
    }

    /// Check the status and return the locator of a servable tenant.
    pub fn servable_locator(&self) -> TenantResult<&Locator> {
        match self.status {
            TenantStatus::Disabled => Err(TenantError::tenant_disabled(self.id.as_str())),
            TenantStatus::Provisioning => Err(TenantError::tenant_not_ready(self.id.as_str())),
            TenantStatus::Active => self
                .locator
                .as_ref()
                .ok_or_else(|| TenantError::tenant_not_ready(self.id.as_str())),
        }
    }
}

/// Normalize an email for lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
