use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::Caller;
use crate::api::state::AppState;
use crate::db::{ConversationRepository, ConversationSummary, Message, MessageRepository};
use crate::error::AppError;
use crate::feed::{ChangeEvent, ChangeKind};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct GetMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub before: Option<i64>, // Cursor for pagination
    /// Message id to catch up from after a feed notification; ignores
    /// `limit` and `before`.
    pub after: Option<String>,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/conversations (requires auth)
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let conversations = ConversationRepository::list_for(&state.db, &caller.id).await?;
    Ok(Json(conversations))
}

/// POST /api/conversations/:id/messages (requires auth)
pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    let (conversation, message) =
        MessageRepository::append(&state.db, &conversation_id, &caller.id, &req.content).await?;

    tracing::debug!(conversation_id = %conversation.id, message_id = %message.id, "message stored");

    state.feed.publish(ChangeEvent::for_message(&conversation, &message));
    state
        .feed
        .publish(ChangeEvent::for_conversation(ChangeKind::Update, &conversation));

    Ok(Json(SendMessageResponse {
        message_id: message.id,
        created_at: message.created_at,
    }))
}

/// GET /api/conversations/:id/messages (requires auth)
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<Vec<Message>>, AppError> {
    if let Some(after) = query.after.as_deref() {
        let conversation = ConversationRepository::get_required(&state.db, &conversation_id).await?;
        if !conversation.has_participant(&caller.id) {
            return Err(AppError::Authorization(
                "You are not a participant of this conversation".to_string(),
            ));
        }
        let messages = MessageRepository::get_since(&state.db, &conversation_id, after).await?;
        return Ok(Json(messages));
    }

    // Clamp limit to prevent abuse
    let limit = query.limit.clamp(1, 100);

    let messages = MessageRepository::list(
        &state.db,
        &conversation_id,
        &caller.id,
        query.before,
        Some(limit),
    )
    .await?;

    Ok(Json(messages))
}
