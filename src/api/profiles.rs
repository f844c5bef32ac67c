use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use serde::Deserialize;

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::db::{MediaRepository, Profile, ProfileRepository, SkillMedia};
use crate::error::AppError;
use crate::feed::{ChangeEvent, ChangeKind, Table};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
    #[serde(default)]
    pub tagline: String,
    /// Comma separated.
    #[serde(default)]
    pub teachable_skills: String,
}

/// Uploads are sent as the raw request body; the file name travels in the
/// query string and the type in `Content-Type`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CaptionRequest {
    pub caption: Option<String>,
}

fn content_type(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("Content-Type header is required".to_string()))
}

/// GET /api/profiles/:id
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(ProfileRepository::get_required(&state.db, &id).await?))
}

/// PUT /api/profile
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let profile = ProfileRepository::update(
        &state.db,
        &caller.id,
        &req.display_name,
        &req.tagline,
        &req.teachable_skills,
    )
    .await?;

    state
        .feed
        .publish(ChangeEvent::public(Table::Profiles, ChangeKind::Update, profile.id.clone()));

    Ok(Json(profile))
}

/// PUT /api/profile/avatar
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .uploads
        .set_avatar(&state.db, &caller.id, &query.file_name, content_type(&headers)?, &body)
        .await?;

    state
        .feed
        .publish(ChangeEvent::public(Table::Profiles, ChangeKind::Update, profile.id.clone()));

    Ok(Json(profile))
}

/// GET /api/profiles/:id/media
pub async fn list_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SkillMedia>>, AppError> {
    Ok(Json(MediaRepository::list_for_profile(&state.db, &id).await?))
}

/// POST /api/profile/media
pub async fn upload_media(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SkillMedia>, AppError> {
    let media = state
        .uploads
        .upload_media(&state.db, &caller.id, &query.file_name, content_type(&headers)?, &body)
        .await?;

    tracing::info!(media_id = %media.id, kind = ?media.media_kind, size = body.len(), "media uploaded");
    state
        .feed
        .publish(ChangeEvent::public(Table::SkillMedia, ChangeKind::Insert, media.id.clone()));

    Ok(Json(media))
}

/// PATCH /api/profile/media/:id
pub async fn update_caption(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(req): Json<CaptionRequest>,
) -> Result<Json<SkillMedia>, AppError> {
    let media =
        MediaRepository::update_caption(&state.db, &caller.id, &id, req.caption.as_deref()).await?;

    state
        .feed
        .publish(ChangeEvent::public(Table::SkillMedia, ChangeKind::Update, media.id.clone()));

    Ok(Json(media))
}

/// DELETE /api/profile/media/:id
pub async fn delete_media(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<SkillMedia>, AppError> {
    let media = state.uploads.delete_media(&state.db, &caller.id, &id).await?;

    state
        .feed
        .publish(ChangeEvent::public(Table::SkillMedia, ChangeKind::Delete, media.id.clone()));

    Ok(Json(media))
}
