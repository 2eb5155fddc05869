use std::collections::BTreeSet;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::{AppError, AppResult},
    models::{UserAccess, UserProfile},
    permissions::{self, Permission, Role},
    repository::RepositoryState,
};

/// Name of the HttpOnly cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "session";

/// Claims
///
/// Payload of a session JWT. Signed with `AppConfig::jwt_secret`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's UUID.
    pub sub: Uuid,
    /// Expiration Time (exp): validated on every request.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request: who the caller is, their role,
/// and the effective permission set computed from groups and direct grants.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    pub groups: Vec<String>,
    pub permissions: BTreeSet<Permission>,
}

impl AuthUser {
    pub fn from_access(access: UserAccess) -> Self {
        let permissions =
            permissions::effective_permissions(&access.direct_permissions, &access.groups);
        Self {
            id: access.user.id,
            username: access.user.username,
            email: access.user.email,
            role: access.user.role,
            groups: access.groups.into_iter().map(|g| g.name).collect(),
            permissions,
        }
    }

    pub fn has_perm(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Fails closed with `Forbidden` unless the caller holds `permission`.
    pub fn require(&self, permission: Permission) -> AppResult<()> {
        if self.has_perm(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "user '{}' lacks {}",
                self.username, permission
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        permissions::is_admin(self.role)
    }

    pub fn is_librarian(&self) -> bool {
        permissions::is_librarian(self.role)
    }

    pub fn is_member(&self) -> bool {
        permissions::is_member(self.role)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "user '{}' is not an admin",
                self.username
            )))
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            groups: self.groups.clone(),
            permissions: self.permissions.iter().copied().collect(),
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Resolution order:
/// 1. An identity already resolved by `auth_middleware` for this request.
/// 2. Local bypass: the `x-user-id` header, only in `Env::Local`.
/// 3. `Authorization: Bearer <jwt>`.
/// 4. The `session` cookie.
///
/// The user, role, groups and grants are re-read from the repository every time, so a
/// role change or account deletion takes effect on the next request.
///
/// Rejection: `AppError::Unauthenticated` (401), or 500 if the repository fails.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|id_str| Uuid::parse_str(id_str).ok());
            if let Some(user_id) = bypass_id {
                if let Some(access) = repo.get_user_access(user_id).await? {
                    return Ok(AuthUser::from_access(access));
                }
            }
        }

        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        let token = match bearer {
            Some(token) => token,
            None => CookieJar::from_headers(&parts.headers)
                .get(SESSION_COOKIE)
                .map(|c| c.value().to_string())
                .ok_or(AppError::Unauthenticated)?,
        };

        let user_id = decode_token(&token, &config.jwt_secret).ok_or(AppError::Unauthenticated)?;

        // A valid token for a deleted user is still rejected.
        let access = repo
            .get_user_access(user_id)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(AuthUser::from_access(access))
    }
}

/// Signs a session JWT for `user_id` valid for `session_ttl_hours`.
pub fn issue_token(user_id: Uuid, config: &AppConfig) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.session_ttl_hours)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

/// Returns the subject of a valid, unexpired token.
pub fn decode_token(token: &str, secret: &str) -> Option<Uuid> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Some(data.claims.sub),
        Err(e) => {
            tracing::debug!(error = %e, "rejected session token");
            None
        }
    }
}

/// Hashes a password with Argon2id and a random salt into a PHC string.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

pub fn session_cookie(token: String, config: &AppConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.env == Env::Production)
        .build()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, User};

    fn access(role: Option<Role>, groups: Vec<Group>, direct: Vec<Permission>) -> UserAccess {
        UserAccess {
            user: User {
                id: Uuid::new_v4(),
                username: "reader".to_string(),
                email: "reader@example.com".to_string(),
                password_hash: String::new(),
                role,
                created_at: Utc::now(),
            },
            groups,
            direct_permissions: direct,
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct-horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct-horse", &hash));
        assert!(!verify_password("wrong-horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn token_round_trip_and_wrong_secret() {
        let config = AppConfig::default();
        let id = Uuid::new_v4();
        let token = issue_token(id, &config).unwrap();

        assert_eq!(decode_token(&token, &config.jwt_secret), Some(id));
        assert_eq!(decode_token(&token, "some-other-secret"), None);
        assert_eq!(decode_token("garbage", &config.jwt_secret), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AppConfig::default();
        let past = Utc::now() - Duration::hours(2);
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: past.timestamp() as usize,
            exp: (past + Duration::minutes(5)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert_eq!(decode_token(&token, &config.jwt_secret), None);
    }

    #[test]
    fn auth_user_merges_group_and_direct_permissions() {
        let user = AuthUser::from_access(access(
            Some(Role::Member),
            vec![Group {
                name: "Viewers".to_string(),
                permissions: vec![Permission::BookView],
            }],
            vec![Permission::BookDelete],
        ));

        assert!(user.require(Permission::BookView).is_ok());
        assert!(user.require(Permission::BookDelete).is_ok());
        assert!(matches!(
            user.require(Permission::BookCreate),
            Err(AppError::Forbidden(_))
        ));
        assert!(user.is_member());
        assert!(user.require_admin().is_err());
    }

    #[test]
    fn user_without_role_is_nothing() {
        let user = AuthUser::from_access(access(None, vec![], vec![]));
        assert!(!user.is_admin());
        assert!(!user.is_librarian());
        assert!(!user.is_member());
        assert!(user.permissions.is_empty());
    }
}
