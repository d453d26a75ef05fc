//! Registration and login.

use axum::Json;
use axum::extract::State;
use http::StatusCode;
use parish_core::error::TenantError;
use parish_core::import::validate_name;
use parish_core::model::Admin;
use parish_core::tenant::{NewTenant, Principal, SeedAdmin, Tenant, TenantId, normalize_email};
use serde::{Deserialize, Serialize};
use tracing::{Span, field, info, instrument};

use super::ApiJson;
use crate::auth::{hash_password_blocking, verify_password_blocking};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub church_id: Option<String>,
    pub church_name: String,
    pub admin_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct ChurchSummary {
    pub id: TenantId,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub church: ChurchSummary,
    pub admin: Admin,
}

fn checked_email(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(TenantError::invalid_input("email", "a valid email address is required").into()),
    }
}

/// Look up the tenant's administrator and issue a token for it.
async fn session(state: &AppState, tenant: Tenant, email: &str, password: Option<String>) -> ApiResult<AuthResponse> {
    let authorized = state.coordinator.guard().authorize_login(&tenant)?;
    let lease = state.coordinator.lease_authorized(authorized).await?;
    let creds = lease
        .conn()
        .find_admin(email)
        .await?
        .ok_or_else(TenantError::invalid_credentials)?;
    drop(lease);

    if let Some(password) = password {
        if !verify_password_blocking(password, creds.password_hash).await? {
            return Err(TenantError::invalid_credentials().into());
        }
    }

    let principal = Principal {
        tenant: tenant.id.clone(),
        admin_id: creds.admin.id.clone(),
        email: creds.admin.email.clone(),
    };
    Ok(AuthResponse {
        access_token: state.tokens.issue(&principal)?,
        church: ChurchSummary {
            id: tenant.id,
            name: tenant.name,
        },
        admin: creds.admin,
    })
}

/// `POST /api/auth/register`
#[instrument(skip_all, fields(tenant_id = field::Empty))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let church_name = validate_name("churchName", &body.church_name)
        .map_err(|msg| TenantError::invalid_input("churchName", msg))?;
    let admin_name = validate_name("adminName", &body.admin_name)
        .map_err(|msg| TenantError::invalid_input("adminName", msg))?;
    let email = checked_email(&body.email)?;
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(TenantError::invalid_input(
            "password",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
        )
        .into());
    }
    let id = match body.church_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => TenantId::parse(raw)?,
        _ => TenantId::generate(),
    };
    Span::current().record("tenant_id", field::display(&id));

    let password_hash = hash_password_blocking(body.password).await?;
    let tenant = state
        .provisioning
        .provision(&NewTenant {
            id,
            name: church_name,
            admin: SeedAdmin {
                email: email.clone(),
                name: admin_name,
                password_hash,
            },
        })
        .await?;
    info!("Church registered");

    let response = session(&state, tenant, &email, None).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `POST /api/auth/login`
#[instrument(skip_all, fields(tenant_id = field::Empty))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = normalize_email(&body.email);
    let tenant = state
        .registry
        .find_by_admin_email(&email)
        .await?
        .ok_or_else(TenantError::invalid_credentials)?;
    Span::current().record("tenant_id", field::display(&tenant.id));

    let response = session(&state, tenant, &email, Some(body.password)).await?;
    info!("Admin logged in");
    Ok(Json(response))
}
