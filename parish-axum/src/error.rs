//! HTTP rendering of tenant errors.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::multipart::MultipartError;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use parish_core::error::{ErrorCode, TenantError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// A tenant data plane error.
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// The request body, path or query could not be read.
    #[error("{0}")]
    BadRequest(String),
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    code: String,
    name: &'a str,
    message: &'a str,
    retryable: bool,
}

impl ApiError {
    /// Machine-readable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Tenant(e) => e.code,
            Self::BadRequest(_) => ErrorCode::InvalidInput,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal details stay in the log.
        let message = match &self {
            Self::Tenant(e) if status.is_server_error() && !code.is_retryable() => {
                error!(code = %code.code(), error = %e.display_full(), "Request failed");
                "Internal server error".to_string()
            }
            Self::Tenant(e) => {
                if status.is_server_error() {
                    warn!(code = %code.code(), error = %e, "Request failed; retryable");
                }
                e.message.clone()
            }
            Self::BadRequest(msg) => msg.clone(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.code(),
                name: code.name(),
                message: &message,
                retryable: code.is_retryable(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(after) = code.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn render(err: ApiError) -> (StatusCode, Option<String>, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let retry = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, retry, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_cross_tenant_is_forbidden() {
        let (status, retry, body) = render(TenantError::cross_tenant("grp.a.1").into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(retry, None);
        assert_eq!(body["error"]["code"], "T3001");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_pool_exhausted_carries_retry_after() {
        let err = TenantError::pool_exhausted(64, Duration::from_secs(5));
        let (status, retry, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(retry.is_some());
        assert_eq!(body["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn test_internal_details_hidden() {
        let err = TenantError::database("disk I/O error at /var/lib/parish");
        let (status, _, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_bad_request() {
        let (status, _, body) = render(ApiError::BadRequest("missing field".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "T5002");
    }
}
