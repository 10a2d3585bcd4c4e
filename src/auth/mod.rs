//! Authentication and scope resolution
//!
//! Every protected route resolves its caller to a user id (the scope all
//! store operations are confined to) before any handler logic runs. Two
//! credential kinds are accepted:
//! - `Authorization: Bearer <api-key>` — device clients (mobile/tablet)
//! - `auth_token` cookie — the web app session
//!
//! Requests without a resolvable scope are rejected with 401.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use rand::RngCore;

use crate::db::UserRepository;
use crate::error::AppError;
use crate::state::AppState;

/// Name of the session cookie
pub const AUTH_COOKIE: &str = "auth_token";

const SESSION_MAX_AGE_SECS: i64 = 3600 * 24 * 30;

/// The authenticated caller's scope
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let repo = UserRepository::new(state.db());

        // 1. API key (devices)
        if let Some(token) = bearer_token(parts) {
            if let Some(api_key) = repo.find_api_key(token).await? {
                return Ok(AuthUser {
                    user_id: api_key.user_id,
                });
            }
        }

        // 2. Session cookie (web). The cookie carries a raw user id, so it
        // must be checked against the store before it is trusted.
        if let Some(user_id) = cookie_value(parts, AUTH_COOKIE) {
            if repo.find_by_id(&user_id).await?.is_some() {
                return Ok(AuthUser { user_id });
            }
        }

        Err(AppError::Unauthorized)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    let header = parts.headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Build the `Set-Cookie` value establishing a session
pub fn session_cookie(user_id: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        AUTH_COOKIE, user_id, SESSION_MAX_AGE_SECS
    )
}

/// Build the `Set-Cookie` value clearing the session
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", AUTH_COOKIE)
}

/// Hash a password for storage
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Generate a fresh API key: 32 random bytes, hex-encoded
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_cookie(cookie: &str) -> Parts {
        let request = Request::builder()
            .header(COOKIE, cookie)
            .body(())
            .unwrap();
        request.into_parts().0
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("secret123", "not-a-hash"));
    }

    #[test]
    fn test_api_key_generation() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_cookie_parsing() {
        let parts = parts_with_cookie("theme=dark; auth_token=user-1; lang=en");
        assert_eq!(cookie_value(&parts, AUTH_COOKIE).as_deref(), Some("user-1"));

        let parts = parts_with_cookie("auth_token=");
        assert_eq!(cookie_value(&parts, AUTH_COOKIE), None);

        let parts = parts_with_cookie("other=value");
        assert_eq!(cookie_value(&parts, AUTH_COOKIE), None);
    }

    #[test]
    fn test_bearer_parsing() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer abc123")
            .body(())
            .unwrap();
        let parts = request.into_parts().0;
        assert_eq!(bearer_token(&parts), Some("abc123"));

        let request = Request::builder()
            .header(AUTHORIZATION, "Basic abc123")
            .body(())
            .unwrap();
        let parts = request.into_parts().0;
        assert_eq!(bearer_token(&parts), None);
    }
}
