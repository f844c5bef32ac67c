use axum::{
    extract::State,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::crypto::{generate_salt, hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::db::{Profile, ProfileRepository, SessionRepository, UserRepository};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub user_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub user_id: String,
    pub username: String,
    pub profile: Profile,
}

/// Validate and sanitize username
fn validate_username(username: &str) -> Result<String, AppError> {
    let trimmed = username.trim();

    if trimmed.len() < 3 || trimmed.len() > 32 {
        return Err(AppError::Validation("Username must be 3-32 characters".to_string()));
    }

    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::Validation(
            "Username must be alphanumeric, underscore, or hyphen".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let username = validate_username(&req.username)?;

    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    if UserRepository::get_by_username(&state.db, &username).await?.is_some() {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }

    let salt = generate_salt();
    let password_hash = hash_password(&req.password, &salt)?;

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&username)
        .to_string();

    let (user, profile) = UserRepository::create_with_profile(
        &state.db,
        username,
        &password_hash,
        &salt,
        &display_name,
    ).await?;

    tracing::info!(user_id = %user.id, "account registered");

    Ok(Json(RegisterResponse {
        user_id: user.id,
        display_name: profile.display_name,
    }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let username = validate_username(&req.username)
        .map_err(|_| AppError::Auth("Invalid credentials".to_string()))?;

    let user = UserRepository::get_by_username(&state.db, &username)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid credentials".to_string()))?;

    if !verify_password(&req.password, &user.password_hash, &user.password_salt)? {
        return Err(AppError::Auth("Invalid credentials".to_string()));
    }

    let session = SessionRepository::create(
        &state.db,
        user.id.clone(),
        state.config.session_expiry_hours,
    ).await?;

    Ok(Json(LoginResponse {
        session_token: session.token,
        user_id: user.id,
        expires_at: session.expires_at,
    }))
}

/// POST /api/auth/logout (requires auth)
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<serde_json::Value>, AppError> {
    SessionRepository::delete(&state.db, &caller.token).await?;

    Ok(Json(serde_json::json!({"success": true})))
}

/// GET /api/auth/me (requires auth)
pub async fn me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<UserInfoResponse>, AppError> {
    let user = UserRepository::get_by_id(&state.db, &caller.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let profile = ProfileRepository::get_required(&state.db, &caller.id).await?;

    Ok(Json(UserInfoResponse {
        user_id: user.id,
        username: user.username,
        profile,
    }))
}
