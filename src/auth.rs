//! Credentials, tokens and the request-side identity of a caller.

use crate::{
    entity::Entity,
    error::{ApiError, ApiResult},
    models::user::{Role, User},
};
use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{future::Future, pin::Pin};

const TOKEN_LEN: usize = 32;

/// Argon2id PHC string (`$argon2id$v=19$...`) with a fresh random salt.
pub fn password_hash(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;
    Ok(hash.to_string())
}

/// A malformed stored hash never verifies.
pub fn password_verify(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::error!(%err, "stored password hash is malformed");
            false
        }
    }
}

/// Sessions are stored by this digest, never by the raw token.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn session_token() -> String {
    let mut buf = [0u8; TOKEN_LEN];
    rand::rngs::OsRng.fill(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Accepts `Bearer <token>` and the DRF-style `Token <token>`.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    (matches!(scheme, "Bearer" | "bearer" | "Token") && !token.is_empty())
        .then(|| token.to_string())
}

/// An authenticated, active user resolved from the request's token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn require(&self, role: Role) -> ApiResult<()> {
        if self.user.role.satisfies(role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "you do not have permission to perform this action",
            ))
        }
    }

    /// Deactivated libraries (and their books) stay visible to admins only.
    pub fn sees_inactive(&self) -> bool {
        self.user.role.satisfies(Role::Admin)
    }

    /// Libraries this caller administers: `None` means all of them.
    pub fn library_scope(&self) -> ApiResult<Option<i64>> {
        match self.user.role {
            Role::SuperAdmin => Ok(None),
            Role::Admin => self
                .user
                .library_id
                .map(Some)
                .ok_or_else(|| ApiError::forbidden("admin account is not assigned to a library")),
            Role::Student => Err(ApiError::forbidden(
                "you do not have permission to perform this action",
            )),
        }
    }

    pub fn require_library(&self, library_id: i64) -> ApiResult<()> {
        match self.library_scope()? {
            Some(own) if own != library_id => Err(ApiError::forbidden(
                "you can only manage your own library",
            )),
            _ => Ok(()),
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = bearer_token(req);
        let entity = req.app_data::<Data<Entity>>().cloned();

        Box::pin(async move {
            let token = token.ok_or_else(|| {
                ApiError::Unauthorized("authentication credentials were not provided".into())
            })?;
            let entity = entity.ok_or_else(|| ApiError::Internal("entity not configured".into()))?;

            let user = entity
                .user_by_token(&token)
                .await?
                .ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;

            Ok(AuthUser { user, token })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::user::User;
    use actix_web::test::TestRequest;
    use chrono::Utc;

    fn auth(role: Role, library_id: Option<i64>) -> AuthUser {
        AuthUser {
            user: User {
                id: 7,
                email: "admin@example.com".into(),
                full_name: "Admin".into(),
                role,
                role_display: String::new(),
                library_id,
                is_active: true,
                date_joined: Utc::now(),
                last_login: None,
            },
            token: "t".into(),
        }
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = password_hash("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(password_verify("hunter22", &hash));
        assert!(!password_verify("hunter23", &hash));

        assert_ne!(hash, password_hash("hunter22").unwrap());
        assert!(!password_verify("hunter22", "not a phc string"));
    }

    #[test]
    fn test_token_digest() {
        let token = session_token();
        assert_eq!(token_digest(&token), token_digest(&token));
        assert_ne!(token_digest(&token), token);
        assert_ne!(token_digest(&token), token_digest(&session_token()));
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = session_token();
        let b = session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc123"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc123"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Token xyz"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("xyz"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer "))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        assert_eq!(bearer_token(&TestRequest::default().to_http_request()), None);
    }

    #[test]
    fn test_require_role() {
        assert!(auth(Role::Admin, Some(1)).require(Role::Admin).is_ok());
        assert!(auth(Role::Admin, Some(1)).require(Role::SuperAdmin).is_err());
        assert!(auth(Role::Student, None).require(Role::Student).is_ok());
        assert!(auth(Role::Student, None).require(Role::Admin).is_err());
    }

    #[test]
    fn test_library_scope() {
        assert_eq!(auth(Role::SuperAdmin, None).library_scope().unwrap(), None);
        assert_eq!(auth(Role::Admin, Some(3)).library_scope().unwrap(), Some(3));
        assert!(auth(Role::Admin, None).library_scope().is_err());
        assert!(auth(Role::Student, Some(3)).library_scope().is_err());

        assert!(auth(Role::Admin, Some(3)).require_library(3).is_ok());
        assert!(auth(Role::Admin, Some(3)).require_library(4).is_err());
        assert!(auth(Role::SuperAdmin, None).require_library(4).is_ok());
    }

    #[test]
    fn test_sees_inactive() {
        assert!(!auth(Role::Student, None).sees_inactive());
        assert!(auth(Role::Admin, Some(1)).sees_inactive());
        assert!(auth(Role::SuperAdmin, None).sees_inactive());
    }
}
