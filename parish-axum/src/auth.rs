//! Bearer tokens and password hashing.
//!
//! Tokens are HS256 JWTs carrying the tenant id, so a principal is known
//! without touching any store. Passwords are hashed with Argon2id and only
//! ever stored inside the tenant's own store.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRef, FromRequestParts};
use chrono::Utc;
use http::header;
use http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parish_core::error::{TenantError, TenantResult};
use parish_core::tenant::{Principal, TenantId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Administrator id.
    pub sub: String,
    /// Tenant (church) id.
    pub tid: String,
    /// Administrator email.
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies access tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a service signing with `secret`.
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Issue a token for `principal`.
    pub fn issue(&self, principal: &Principal) -> TenantResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: principal.admin_id.clone(),
            tid: principal.tenant.to_string(),
            email: principal.email.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TenantError::internal(format!("token encoding failed: {}", e)))
    }

    /// Verify a token and recover its principal.
    pub fn verify(&self, token: &str) -> TenantResult<Principal> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TenantError::unauthenticated("Access token expired"),
                _ => {
                    debug!(error = %e, "Rejected access token");
                    TenantError::unauthenticated("Invalid access token")
                }
            })?;

        let tenant = TenantId::parse(claims.tid)
            .map_err(|_| TenantError::unauthenticated("Invalid access token"))?;
        Ok(Principal {
            tenant,
            admin_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> TenantResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TenantError::internal(format!("password hashing failed: {}", e)))
}

/// Check `password` against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> TenantResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| TenantError::internal(format!("stored password hash is malformed: {}", e)))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(TenantError::internal(format!("password verification failed: {}", e))),
    }
}

/// Hashing is CPU-bound; keep it off the async workers.
pub(crate) async fn hash_password_blocking(password: String) -> TenantResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| TenantError::internal(format!("hashing task failed: {}", e)))?
}

pub(crate) async fn verify_password_blocking(password: String, hash: String) -> TenantResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| TenantError::internal(format!("verification task failed: {}", e)))?
}

/// The authenticated caller, taken from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct Auth(pub Principal);

impl<S> FromRequestParts<S> for Auth
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = Arc::<TokenService>::from_ref(state);
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| TenantError::unauthenticated("Missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TenantError::unauthenticated("Missing bearer token"))?;
        Ok(Self(tokens.verify(token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parish_core::error::ErrorCode;
    use pretty_assertions::assert_eq;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn principal() -> Principal {
        Principal {
            tenant: TenantId::parse("grace").unwrap(),
            admin_id: "admin-1".into(),
            email: "pastor@grace.org".into(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let tokens = TokenService::new(SECRET, "parish", Duration::from_secs(3600));
        let token = tokens.issue(&principal()).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), principal());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let ours = TokenService::new(SECRET, "parish", Duration::from_secs(3600));
        let theirs = TokenService::new(b"another-secret-another-secret-!!", "parish", Duration::from_secs(3600));
        let token = theirs.issue(&principal()).unwrap();
        assert_eq!(ours.verify(&token).unwrap_err().code, ErrorCode::Unauthenticated);
    }

    #[test]
    fn test_token_from_other_issuer_rejected() {
        let ours = TokenService::new(SECRET, "parish", Duration::from_secs(3600));
        let theirs = TokenService::new(SECRET, "elsewhere", Duration::from_secs(3600));
        let token = theirs.issue(&principal()).unwrap();
        assert!(ours.verify(&token).is_err());
        assert!(ours.verify("not-a-token").is_err());
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
        assert!(verify_password("x", "not a hash").is_err());
    }
}
