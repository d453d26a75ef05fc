//! `/api/groups/branches/{branchId}/groups`

use axum::Json;
use axum::extract::State;
use http::StatusCode;
use parish_core::model::{Collection, Group, Page, ResourceKind};
use parish_core::tenant::AccessTarget;
use tracing::instrument;

use super::{ApiJson, ApiPath, ApiQuery, ListParams, NameRequest, resource_id};
use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

#[instrument(skip_all, fields(tenant_id = %principal.tenant, branch = %branch))]
pub async fn list(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(branch): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Group>>> {
    let branch = resource_id(&branch, ResourceKind::Branch)?;
    let lease = state
        .coordinator
        .lease(&principal, &AccessTarget::Resource(branch.clone()))
        .await?;
    let window = params.window();
    let page = state
        .coordinator
        .read_through(&lease, Collection::Groups(branch.clone()), window, || {
            lease.conn().list_groups(&branch, window)
        })
        .await?;
    Ok(Json(page))
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant, branch = %branch))]
pub async fn create(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(branch): ApiPath<String>,
    ApiJson(body): ApiJson<NameRequest>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let branch = resource_id(&branch, ResourceKind::Branch)?;
    let txn = state
        .coordinator
        .begin(&principal, &AccessTarget::Resource(branch.clone()))
        .await?;
    let affected = [Collection::Groups(branch.clone())];
    let result = txn.conn().create_group(&branch, &body.name).await;
    let group = match result {
        Ok(group) => group,
        Err(e) => return Err(txn.abort(e, &affected).await.into()),
    };
    let group = txn.commit(group, &affected).await?.respond();
    Ok((StatusCode::CREATED, Json(group)))
}
