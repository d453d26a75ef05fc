//! `/api/groups/{groupId}/members`

use axum::Json;
use axum::extract::{Multipart, State};
use http::StatusCode;
use parish_core::error::TenantError;
use parish_core::import::ImportReport;
use parish_core::model::{Collection, Member, NewMember, Page, ResourceKind};
use parish_core::tenant::AccessTarget;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ApiJson, ApiPath, ApiQuery, ListParams, resource_id};
use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

/// Largest accepted CSV upload.
pub const MAX_IMPORT_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field carrying the CSV.
pub const IMPORT_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

impl From<MemberRequest> for NewMember {
    fn from(req: MemberRequest) -> Self {
        Self {
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
        }
    }
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant, group = %group))]
pub async fn list(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(group): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Member>>> {
    let group = resource_id(&group, ResourceKind::Group)?;
    let lease = state
        .coordinator
        .lease(&principal, &AccessTarget::Resource(group.clone()))
        .await?;
    let window = params.window();
    let page = state
        .coordinator
        .read_through(&lease, Collection::Members(group.clone()), window, || {
            lease.conn().list_members(&group, window)
        })
        .await?;
    Ok(Json(page))
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant, group = %group))]
pub async fn create(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(group): ApiPath<String>,
    ApiJson(body): ApiJson<MemberRequest>,
) -> ApiResult<(StatusCode, Json<Member>)> {
    let group = resource_id(&group, ResourceKind::Group)?;
    let txn = state
        .coordinator
        .begin(&principal, &AccessTarget::Resource(group.clone()))
        .await?;
    let affected = [Collection::Members(group.clone())];
    let result = txn.conn().add_member(&group, body.into()).await;
    let member = match result {
        Ok(member) => member,
        Err(e) => return Err(txn.abort(e, &affected).await.into()),
    };
    let member = txn.commit(member, &affected).await?.respond();
    Ok((StatusCode::CREATED, Json(member)))
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant, group = %path.0, member = %path.1))]
pub async fn delete(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(path): ApiPath<(String, String)>,
) -> ApiResult<StatusCode> {
    let group = resource_id(&path.0, ResourceKind::Group)?;
    let member = resource_id(&path.1, ResourceKind::Member)?;
    let target = AccessTarget::Nested {
        parent: group.clone(),
        child: member.clone(),
    };
    let txn = state.coordinator.begin(&principal, &target).await?;
    let affected = [Collection::Members(group.clone())];
    let result = txn.conn().delete_member(&group, &member).await;
    if let Err(e) = result {
        return Err(txn.abort(e, &affected).await.into());
    }
    txn.commit((), &affected).await?.respond();
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant, group = %group))]
pub async fn import(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(group): ApiPath<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<ImportReport>> {
    let group = resource_id(&group, ResourceKind::Group)?;

    let mut csv = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMPORT_FIELD) {
            csv = Some(field.text().await?);
            break;
        }
    }
    let csv = csv.ok_or_else(|| {
        TenantError::invalid_input(IMPORT_FIELD, "multipart field 'file' with the CSV is required")
    })?;
    debug!(bytes = csv.len(), "Import upload received");

    let txn = state
        .coordinator
        .begin(&principal, &AccessTarget::Resource(group.clone()))
        .await?;
    let affected = [Collection::Members(group.clone())];
    let result = txn.conn().import_members(&group, csv).await;
    let report = match result {
        Ok(report) => report,
        Err(e) => return Err(txn.abort(e, &affected).await.into()),
    };
    let report = txn.commit(report, &affected).await?.respond();
    Ok(Json(report))
}
