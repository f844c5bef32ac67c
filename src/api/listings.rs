use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::db::{Listing, ListingRepository, MatchRequest, NewListing, RequestRepository};
use crate::error::AppError;
use crate::feed::{ChangeEvent, ChangeKind, Table};

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    /// Matched against the skill wanted.
    pub want: Option<String>,
    /// Matched against the skill offered.
    pub offer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub swap_conditions: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub listing_id: String,
    pub rejected_requests: usize,
}

/// GET /api/listings
pub async fn browse(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Vec<Listing>>, AppError> {
    let listings = ListingRepository::browse(
        &state.db,
        Some(&caller.id),
        query.want.as_deref(),
        query.offer.as_deref(),
    )
    .await?;

    Ok(Json(listings))
}

/// GET /api/listings/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let listing = ListingRepository::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing {}", id)))?;

    Ok(Json(listing))
}

/// POST /api/listings
pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(new): Json<NewListing>,
) -> Result<Json<Listing>, AppError> {
    let listing = ListingRepository::create(&state.db, &caller.id, new).await?;

    state
        .feed
        .publish(ChangeEvent::public(Table::Listings, ChangeKind::Insert, listing.id.clone()));

    Ok(Json(listing))
}

/// DELETE /api/listings/:id
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawResponse>, AppError> {
    let rejected = ListingRepository::delete_owned(&state.db, &caller.id, &id).await?;

    state.feed.publish_all(
        rejected
            .iter()
            .map(|r| ChangeEvent::for_request(ChangeKind::Update, r)),
    );
    state
        .feed
        .publish(ChangeEvent::public(Table::Listings, ChangeKind::Delete, id.clone()));

    Ok(Json(WithdrawResponse {
        listing_id: id,
        rejected_requests: rejected.len(),
    }))
}

/// POST /api/listings/:id/requests
pub async fn submit_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<MatchRequest>, AppError> {
    let request = RequestRepository::submit(
        &state.db,
        &id,
        &caller.id,
        req.display_name.as_deref(),
        &req.swap_conditions,
    )
    .await?;

    tracing::info!(request_id = %request.id, listing_id = %id, "request submitted");
    state
        .feed
        .publish(ChangeEvent::for_request(ChangeKind::Insert, &request));

    Ok(Json(request))
}
