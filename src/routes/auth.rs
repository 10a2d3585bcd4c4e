//! Authentication API routes
//!
//! Account registration and login (cookie session for the web app), and
//! API key management (bearer credentials for device clients).

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::{
    clear_session_cookie, generate_api_key, hash_password, session_cookie, verify_password,
    AuthUser,
};
use crate::db::{ApiKey, User, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the auth router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route("/apikey", post(create_api_key))
        .route("/apikey/:id", delete(delete_api_key))
}

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    message: &'static str,
    user: User,
}

#[derive(Serialize)]
struct ProfileResponse {
    id: String,
    username: String,
    #[serde(rename = "createdAt")]
    created_at: i64,
    #[serde(rename = "apiKeys")]
    api_keys: Vec<ApiKey>,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse> {
    if req.username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_string()));
    }
    if req.password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    let repo = UserRepository::new(state.db());
    if repo.find_by_username(&req.username).await?.is_some() {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = repo.create(&req.username, &password_hash).await?;

    // Every account starts with one device key
    repo.create_api_key(&user.id, &generate_api_key(), "Default")
        .await?;

    tracing::info!(username = %user.username, "registered new user");

    let cookie = session_cookie(&user.id);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            message: "User created",
            user,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse> {
    let repo = UserRepository::new(state.db());

    let user = repo
        .find_by_username(&req.username)
        .await?
        .filter(|user| verify_password(&req.password, &user.password_hash))
        .ok_or(AppError::Unauthorized)?;

    let cookie = session_cookie(&user.id);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            message: "Logged in",
            user,
        }),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(serde_json::json!({"message": "Logged out"})),
    )
}

async fn profile(State(state): State<AppState>, user: AuthUser) -> Result<Json<ProfileResponse>> {
    let repo = UserRepository::new(state.db());

    let account = repo
        .find_by_id(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let api_keys = repo.list_api_keys(&user.user_id).await?;

    Ok(Json(ProfileResponse {
        id: account.id,
        username: account.username,
        created_at: account.created_at,
        api_keys,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    name: String,
}

async fn create_api_key(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<CreateKeyRequest>>,
) -> Result<Json<ApiKey>> {
    let name = body
        .map(|Json(req)| req.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "New Key".to_string());

    let repo = UserRepository::new(state.db());
    let key = repo
        .create_api_key(&user.user_id, &generate_api_key(), &name)
        .await?;

    Ok(Json(key))
}

async fn delete_api_key(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let repo = UserRepository::new(state.db());
    let deleted = repo.delete_api_key(&id, &user.user_id).await?;

    if deleted {
        Ok(Json(serde_json::json!({"message": "API key deleted"})))
    } else {
        Err(AppError::NotFound("API key not found".to_string()))
    }
}
