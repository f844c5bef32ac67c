use sqlx::{Pool, Sqlite};
use crate::db::models::{Conversation, Message};
use crate::db::{new_id, now_millis, ConversationRepository};
use crate::error::AppError;

pub const MAX_MESSAGE_LEN: usize = 4096;

pub struct MessageRepository;

impl MessageRepository {
    /// Appends a message from one of the two participants and bumps the
    /// conversation's `updated_at`.
    pub async fn append(
        pool: &Pool<Sqlite>,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<(Conversation, Message), AppError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::Validation(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let conversation = ConversationRepository::get_required(pool, conversation_id).await?;
        if !conversation.has_participant(sender_id) {
            return Err(AppError::Validation(
                "Sender is not a participant of this conversation".to_string(),
            ));
        }

        let id = new_id();
        let created_at = now_millis();

        let message = sqlx::query_as::<_, Message>(
            r#"
INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
VALUES (?, ?, ?, ?, ?)
RETURNING *
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(created_at)
        .fetch_one(pool)
        .await?;

        ConversationRepository::touch(pool, conversation_id, created_at).await?;

        Ok((conversation, message))
    }

    /// Messages of a conversation in creation order. `viewer` must be a
    /// participant. With `before`, only messages older than that timestamp;
    /// with `limit`, only the most recent `limit` of those.
    pub async fn list(
        pool: &Pool<Sqlite>,
        conversation_id: &str,
        viewer: &str,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, AppError> {
        let conversation = ConversationRepository::get_required(pool, conversation_id).await?;
        if !conversation.has_participant(viewer) {
            return Err(AppError::Authorization(
                "You are not a participant of this conversation".to_string(),
            ));
        }

        let mut messages = sqlx::query_as::<_, Message>(
            r#"
SELECT * FROM messages
WHERE conversation_id = ? AND (? IS NULL OR created_at < ?)
ORDER BY created_at DESC, rowid DESC
LIMIT ?
            "#
        )
        .bind(conversation_id)
        .bind(before)
        .bind(before)
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    /// Messages stored after `after_id`, oldest first. Used to catch up after
    /// a change notification. The cursor is a message id rather than a
    /// timestamp since several messages can share a millisecond.
    pub async fn get_since(
        pool: &Pool<Sqlite>,
        conversation_id: &str,
        after_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let cursor: Option<(i64,)> = sqlx::query_as(
            "SELECT rowid FROM messages WHERE id = ? AND conversation_id = ?"
        )
        .bind(after_id)
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
        let (cursor,) = cursor.ok_or_else(|| AppError::NotFound(format!("message {}", after_id)))?;

        let messages = sqlx::query_as::<_, Message>(
            r#"
SELECT * FROM messages
WHERE conversation_id = ? AND rowid > ?
ORDER BY created_at ASC, rowid ASC
            "#
        )
        .bind(conversation_id)
        .bind(cursor)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }
}
