//! Route handlers.

pub mod auth;
pub mod branches;
pub mod groups;
pub mod health;
pub mod members;

use axum::extract::{FromRequest, FromRequestParts};
use parish_core::error::TenantError;
use parish_core::model::{ResourceId, ResourceKind, Window};
use parish_core::tenant::TenantId;
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;

/// JSON body whose rejection renders as an [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejection renders as an [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Query parameters whose rejection renders as an [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `offset` / `limit` query parameters of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

impl ListParams {
    pub fn window(self) -> Window {
        Window::new(self.offset, self.limit)
    }
}

/// Body of the create endpoints that only take a name.
#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

/// Parse a resource id from the path.
///
/// An id that does not parse cannot name anything the caller owns, so it is
/// denied like any other foreign or missing resource.
pub(crate) fn resource_id(raw: &str, kind: ResourceKind) -> Result<ResourceId, ApiError> {
    ResourceId::parse_kind(raw, kind).map_err(|_| {
        warn!(resource = %raw, kind = kind.name(), reason = "malformed", "Access denied");
        ApiError::from(TenantError::cross_tenant(raw))
    })
}

/// Parse a church id from the path.
pub(crate) fn church_id(raw: &str) -> Result<TenantId, ApiError> {
    TenantId::parse(raw).map_err(|_| {
        warn!(resource = %raw, reason = "malformed", "Access denied");
        ApiError::from(TenantError::cross_tenant(raw))
    })
}
