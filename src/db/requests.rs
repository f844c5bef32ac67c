use sqlx::{Pool, Sqlite};

use crate::db::models::{MatchRequest, RequestDetails, RequestStatus};
use crate::db::{new_id, now_millis, ListingRepository, ProfileRepository};
use crate::error::AppError;

const REQUEST_COLUMNS: &str = "id, listing_id, sender_id, recipient_id, sender_display_name, swap_conditions, status, created_at";

pub struct RequestRepository;

impl RequestRepository {
    /// Files a pending request against a listing. The recipient is the
    /// listing's owner at this moment, and the listing fields are copied onto
    /// the request so it stays readable after the listing is gone.
    pub async fn submit(
        pool: &Pool<Sqlite>,
        listing_id: &str,
        sender_id: &str,
        sender_display_name: Option<&str>,
        swap_conditions: &str,
    ) -> Result<MatchRequest, AppError> {
        let swap_conditions = swap_conditions.trim();
        if swap_conditions.is_empty() {
            return Err(AppError::Validation("Swap conditions are required".to_string()));
        }

        let listing = ListingRepository::get(pool, listing_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("listing {}", listing_id)))?;

        if listing.owner_id == sender_id {
            return Err(AppError::Validation(
                "You cannot send a request to your own listing".to_string(),
            ));
        }

        let sender_display_name = match sender_display_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ProfileRepository::get(pool, sender_id)
                .await?
                .map(|p| p.display_name)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| AppError::Validation("Your name is required".to_string()))?,
        };

        // The listing columns are read by the insert itself, so a listing
        // deleted since the lookup above inserts nothing.
        let request = sqlx::query_as::<_, MatchRequest>(&format!(
            r#"
INSERT INTO requests (
    id, listing_id, sender_id, recipient_id, sender_display_name, swap_conditions, status,
    listing_title, listing_skill_category, listing_experience_level, listing_description,
    listing_display_name, created_at
)
SELECT ?, id, ?, owner_id, ?, ?, 'pending',
       title, skill_category, experience_level, description, display_name, ?
FROM listings
WHERE id = ?
RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(new_id())
        .bind(sender_id)
        .bind(&sender_display_name)
        .bind(swap_conditions)
        .bind(now_millis())
        .bind(&listing.id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing {}", listing_id)))?;

        tracing::debug!(
            request_id = %request.id,
            listing_id = %listing.id,
            sender = %sender_id,
            "request submitted"
        );
        Ok(request)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<MatchRequest>, AppError> {
        let request = sqlx::query_as::<_, MatchRequest>(&format!(
            "SELECT {} FROM requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(request)
    }

    pub async fn get_required(pool: &Pool<Sqlite>, id: &str) -> Result<MatchRequest, AppError> {
        Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {}", id)))
    }

    /// Every request the identity sent or received, newest first, with the
    /// listing snapshot and both profile names.
    pub async fn list_for(
        pool: &Pool<Sqlite>,
        identity: &str,
    ) -> Result<Vec<RequestDetails>, AppError> {
        let requests = sqlx::query_as::<_, RequestDetails>(
            r#"
SELECT * FROM request_details
WHERE sender_id = ? OR recipient_id = ?
ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(identity)
        .bind(identity)
        .fetch_all(pool)
        .await?;

        Ok(requests)
    }

    pub async fn list_for_listing(
        pool: &Pool<Sqlite>,
        listing_id: &str,
    ) -> Result<Vec<MatchRequest>, AppError> {
        let requests = sqlx::query_as::<_, MatchRequest>(&format!(
            "SELECT {} FROM requests WHERE listing_id = ? ORDER BY created_at ASC, rowid ASC",
            REQUEST_COLUMNS
        ))
        .bind(listing_id)
        .fetch_all(pool)
        .await?;

        Ok(requests)
    }

    /// Moves a request out of `pending`. Returns false when the guard did not
    /// match, i.e. the request is missing or already settled.
    pub async fn settle_if_pending(
        pool: &Pool<Sqlite>,
        id: &str,
        outcome: RequestStatus,
    ) -> Result<bool, AppError> {
        if !outcome.is_settled() {
            return Err(AppError::Validation("A request can only be accepted or rejected".to_string()));
        }

        let result = sqlx::query("UPDATE requests SET status = ? WHERE id = ? AND status = 'pending'")
            .bind(outcome)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Rejects every still-pending request on the listing, optionally sparing
    /// one id, and returns the rows it changed. Safe to repeat.
    pub async fn reject_pending_for_listing(
        pool: &Pool<Sqlite>,
        listing_id: &str,
        except: Option<&str>,
    ) -> Result<Vec<MatchRequest>, AppError> {
        let rejected = sqlx::query_as::<_, MatchRequest>(&format!(
            r#"
UPDATE requests SET status = 'rejected'
WHERE listing_id = ? AND status = 'pending' AND (? IS NULL OR id <> ?)
RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(listing_id)
        .bind(except)
        .bind(except)
        .fetch_all(pool)
        .await?;

        Ok(rejected)
    }
}
