use sqlx::{Pool, Sqlite};

use crate::db::models::{Conversation, ConversationRow, ConversationSummary};
use crate::db::{new_id, now_millis};
use crate::error::AppError;

pub struct ConversationRepository;

impl ConversationRepository {
    /// Returns the conversation opened for `originating_request_id`, creating
    /// it first if none exists. Concurrent callers converge on one row via the
    /// unique key on the request id.
    pub async fn ensure(
        pool: &Pool<Sqlite>,
        participant_a: &str,
        participant_b: &str,
        originating_request_id: &str,
    ) -> Result<Conversation, AppError> {
        if let Some(existing) = Self::get_by_request(pool, originating_request_id).await? {
            return Ok(existing);
        }

        let now = now_millis();
        let inserted = sqlx::query(
            r#"
INSERT INTO conversations (id, participant_a_id, participant_b_id, originating_request_id, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT(originating_request_id) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(participant_a)
        .bind(participant_b)
        .bind(originating_request_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            tracing::debug!(request_id = %originating_request_id, "conversation opened");
        }

        Self::get_by_request(pool, originating_request_id)
            .await?
            .ok_or_else(|| AppError::Internal("Conversation vanished after insert".to_string()))
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Conversation>, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(conversation)
    }

    pub async fn get_required(pool: &Pool<Sqlite>, id: &str) -> Result<Conversation, AppError> {
        Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", id)))
    }

    pub async fn get_by_request(
        pool: &Pool<Sqlite>,
        request_id: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE originating_request_id = ?"
        )
        .bind(request_id)
        .fetch_optional(pool)
        .await?;

        Ok(conversation)
    }

    /// Conversations the identity takes part in, most recently active first,
    /// each labelled with the other side's name.
    pub async fn list_for(
        pool: &Pool<Sqlite>,
        identity: &str,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
SELECT
    c.id, c.participant_a_id, c.participant_b_id, c.originating_request_id,
    c.created_at, c.updated_at,
    r.sender_id AS request_sender_id,
    r.sender_display_name AS request_sender_name,
    r.listing_display_name AS listing_display_name
FROM conversations c
LEFT JOIN requests r ON r.id = c.originating_request_id
WHERE c.participant_a_id = ? OR c.participant_b_id = ?
ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(identity)
        .bind(identity)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into_summary(identity)).collect())
    }

    pub async fn touch(pool: &Pool<Sqlite>, id: &str, at: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET updated_at = MAX(updated_at, ?) WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
