//! Axum REST surface for Parish.
//!
//! Every authenticated route runs the same gate: the bearer token yields a
//! [`Principal`](parish_core::tenant::Principal), the coordinator authorizes
//! the target against it, leases a handle to the caller's own store and
//! confirms ownership before any query runs. Writes invalidate the affected
//! cached collections before the response is sent.
//!
//! # Routes
//!
//! | Method | Path | |
//! |--------|------|-|
//! | POST | `/api/auth/register` | create and provision a church |
//! | POST | `/api/auth/login` | issue a token |
//! | GET, POST | `/api/branches/churches/{churchId}/branches` | |
//! | GET, POST | `/api/groups/branches/{branchId}/groups` | |
//! | GET, POST | `/api/groups/{groupId}/members` | `offset`, `limit` on GET |
//! | DELETE | `/api/groups/{groupId}/members/{memberId}` | |
//! | POST | `/api/groups/{groupId}/members/import` | multipart field `file` |
//! | GET | `/health` | pool and cache counters |
//!
//! # Example
//!
//! ```rust,ignore
//! use parish_axum::{AppState, router};
//! use parish_core::config::ParishConfig;
//!
//! let config = ParishConfig::load("parish.toml".as_ref())?;
//! let state = AppState::open(&config).await?;
//! let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
//! axum::serve(listener, router(state)).await?;
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod state;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};

pub use auth::{Auth, Claims, TokenService, hash_password, verify_password};
pub use error::{ApiError, ApiResult};
pub use middleware::{RequestLog, RequestLogLayer};
pub use server::{run, serve_with_shutdown};
pub use state::{AppState, Coordinator};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    use handlers::{auth, branches, groups, health, members};

    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route(
            "/api/branches/churches/{church_id}/branches",
            get(branches::list).post(branches::create),
        )
        .route(
            "/api/groups/branches/{branch_id}/groups",
            get(groups::list).post(groups::create),
        )
        .route(
            "/api/groups/{group_id}/members",
            get(members::list).post(members::create),
        )
        .route(
            "/api/groups/{group_id}/members/{member_id}",
            delete(members::delete),
        )
        .route(
            "/api/groups/{group_id}/members/import",
            post(members::import).layer(DefaultBodyLimit::max(members::MAX_IMPORT_BYTES)),
        )
        .layer(RequestLogLayer::new())
        .with_state(state)
}

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{ApiError, ApiResult, AppState, Auth, TokenService, router};
}
