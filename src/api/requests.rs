use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::db::{ConversationRepository, RequestDetails, RequestRepository, RequestStatus};
use crate::error::AppError;
use crate::feed::{settlement_events, ChangeEvent, ChangeKind};
use crate::workflow::{MatchWorkflow, Outcome, Settlement, Step};

#[derive(Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: RequestDetails,
    /// The other party's name as the caller should see it.
    pub counterparty_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SettleBody {
    pub outcome: Outcome,
}

/// GET /api/requests
pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<RequestView>>, AppError> {
    let requests = RequestRepository::list_for(&state.db, &caller.id).await?;

    let views = requests
        .into_iter()
        .map(|request| RequestView {
            counterparty_name: request.counterparty_name(&caller.id),
            request,
        })
        .collect();

    Ok(Json(views))
}

/// POST /api/requests/:id/accept
pub async fn accept(
    state: State<AppState>,
    caller: Extension<Caller>,
    id: Path<String>,
) -> Result<Json<Settlement>, AppError> {
    respond(state, caller, id, Outcome::Accepted).await
}

/// POST /api/requests/:id/reject
pub async fn reject(
    state: State<AppState>,
    caller: Extension<Caller>,
    id: Path<String>,
) -> Result<Json<Settlement>, AppError> {
    respond(state, caller, id, Outcome::Rejected).await
}

/// POST /api/requests/:id/settle
pub async fn settle(
    state: State<AppState>,
    caller: Extension<Caller>,
    id: Path<String>,
    Json(body): Json<SettleBody>,
) -> Result<Json<Settlement>, AppError> {
    respond(state, caller, id, body.outcome).await
}

async fn respond(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    outcome: Outcome,
) -> Result<Json<Settlement>, AppError> {
    match MatchWorkflow::settle(&state.db, &caller.id, &id, outcome).await {
        Ok(settlement) => {
            state.feed.publish_all(settlement_events(&settlement));
            Ok(Json(settlement))
        }
        Err(err) => {
            if let AppError::PartialApplication { completed, .. } = &err {
                announce_partial(&state, &id, completed).await;
            }
            Err(err)
        }
    }
}

/// Publishes the changes an interrupted acceptance did commit. The rows are
/// re-read since the engine only reports which steps finished.
async fn announce_partial(state: &AppState, request_id: &str, completed: &[Step]) {
    let request = match RequestRepository::get(&state.db, request_id).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(request_id, "could not re-read request after partial acceptance: {}", e);
            return;
        }
    };

    state
        .feed
        .publish(ChangeEvent::for_request(ChangeKind::Update, &request));

    if completed.contains(&Step::CascadeReject) {
        match RequestRepository::list_for_listing(&state.db, &request.listing_id).await {
            Ok(siblings) => state.feed.publish_all(
                siblings
                    .iter()
                    .filter(|r| r.id != request.id && r.status == RequestStatus::Rejected)
                    .map(|r| ChangeEvent::for_request(ChangeKind::Update, r)),
            ),
            Err(e) => tracing::warn!(request_id, "could not re-read sibling requests: {}", e),
        }
    }

    if completed.contains(&Step::OpenConversation) {
        if let Ok(Some(conversation)) = ConversationRepository::get_by_request(&state.db, request_id).await {
            state
                .feed
                .publish(ChangeEvent::for_conversation(ChangeKind::Insert, &conversation));
        }
    }
}
