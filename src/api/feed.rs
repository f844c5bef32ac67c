use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::error::AppError;
use crate::feed::{FeedFilter, FeedItem, Table};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub table: Option<String>,
}

/// GET /api/feed?table=requests (requires auth)
///
/// Streams change events visible to the caller as SSE. A `lagged` event
/// means some were dropped and the client should re-read its views.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, AppError> {
    let table = query
        .table
        .as_deref()
        .map(str::parse::<Table>)
        .transpose()
        .map_err(AppError::Validation)?;

    tracing::debug!(identity = %caller.id, ?table, "feed subscriber connected");

    let stream = state
        .feed
        .subscribe_filtered(FeedFilter {
            identity: caller.id,
            table,
        })
        .map(|item| {
            let event = match item {
                FeedItem::Change(change) => Event::default()
                    .event("change")
                    .json_data(&change)
                    .unwrap_or_else(|_| Event::default().event("change").data("{}")),
                FeedItem::Lagged(missed) => Event::default()
                    .event("lagged")
                    .data(format!("{{\"missed\":{}}}", missed)),
            };
            Ok::<_, Infallible>(event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
