//! `/api/branches/churches/{churchId}/branches`

use axum::Json;
use axum::extract::State;
use http::StatusCode;
use parish_core::model::{Branch, Collection, Page};
use parish_core::tenant::AccessTarget;
use tracing::instrument;

use super::{ApiJson, ApiPath, ApiQuery, ListParams, NameRequest, church_id};
use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

#[instrument(skip_all, fields(tenant_id = %principal.tenant))]
pub async fn list(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(church): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<Page<Branch>>> {
    let target = AccessTarget::Church(church_id(&church)?);
    let lease = state.coordinator.lease(&principal, &target).await?;
    let window = params.window();
    let page = state
        .coordinator
        .read_through(&lease, Collection::Branches, window, || {
            lease.conn().list_branches(window)
        })
        .await?;
    Ok(Json(page))
}

#[instrument(skip_all, fields(tenant_id = %principal.tenant))]
pub async fn create(
    State(state): State<AppState>,
    Auth(principal): Auth,
    ApiPath(church): ApiPath<String>,
    ApiJson(body): ApiJson<NameRequest>,
) -> ApiResult<(StatusCode, Json<Branch>)> {
    let target = AccessTarget::Church(church_id(&church)?);
    let txn = state.coordinator.begin(&principal, &target).await?;
    let affected = [Collection::Branches];
    let result = txn.conn().create_branch(&body.name).await;
    let branch = match result {
        Ok(branch) => branch,
        Err(e) => return Err(txn.abort(e, &affected).await.into()),
    };
    let branch = txn.commit(branch, &affected).await?.respond();
    Ok((StatusCode::CREATED, Json(branch)))
}
