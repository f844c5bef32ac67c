use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use crate::db::models::{ExperienceLevel, Listing, MatchRequest};
use crate::db::{new_id, now_millis, ProfileRepository, RequestRepository};
use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    /// Skill wanted.
    pub title: String,
    /// Skill offered.
    pub skill_category: String,
    pub experience_level: ExperienceLevel,
    pub location: Option<String>,
    pub description: String,
    /// Falls back to the owner's profile name.
    pub display_name: Option<String>,
}

pub struct ListingRepository;

impl ListingRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        owner_id: &str,
        new: NewListing,
    ) -> Result<Listing, AppError> {
        let title = required(&new.title, "Skill wanted")?;
        let skill_category = required(&new.skill_category, "Skill offered")?;
        let description = required(&new.description, "Description")?;

        let display_name = match new.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ProfileRepository::get_required(pool, owner_id).await?.display_name,
        };
        let location = new
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        let listing = sqlx::query_as::<_, Listing>(
            r#"
INSERT INTO listings (id, owner_id, title, skill_category, experience_level, location, description, display_name, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(owner_id)
        .bind(title)
        .bind(skill_category)
        .bind(new.experience_level)
        .bind(location)
        .bind(description)
        .bind(display_name)
        .bind(now_millis())
        .fetch_one(pool)
        .await?;

        tracing::debug!(listing_id = %listing.id, owner = %owner_id, "listing created");
        Ok(listing)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Listing>, AppError> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(listing)
    }

    /// Newest first.
    pub async fn all(pool: &Pool<Sqlite>) -> Result<Vec<Listing>, AppError> {
        let listings = sqlx::query_as::<_, Listing>(
            "SELECT * FROM listings ORDER BY created_at DESC, rowid DESC"
        )
        .fetch_all(pool)
        .await?;

        Ok(listings)
    }

    /// Listing board for `viewer`: filtered by the search terms and ranked by
    /// the viewer's teachable skills.
    pub async fn browse(
        pool: &Pool<Sqlite>,
        viewer: Option<&str>,
        want: Option<&str>,
        offer: Option<&str>,
    ) -> Result<Vec<Listing>, AppError> {
        let skills = match viewer {
            Some(id) => ProfileRepository::get(pool, id)
                .await?
                .map(|p| p.teachable_skill_list())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let listings = Self::all(pool).await?;
        Ok(rank_listings(listings, &skills, want, offer))
    }

    /// Removes the row. Deleting an absent listing is not an error; the
    /// number of rows removed is returned.
    pub async fn delete(pool: &Pool<Sqlite>, id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Owner withdraws an open listing. Pending requests on it are rejected
    /// first so none is left waiting on a listing that no longer exists.
    /// Returns the requests that were rejected.
    pub async fn delete_owned(
        pool: &Pool<Sqlite>,
        owner: &str,
        id: &str,
    ) -> Result<Vec<MatchRequest>, AppError> {
        let listing = Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("listing {}", id)))?;

        if listing.owner_id != owner {
            return Err(AppError::Authorization(
                "Only the owner can remove this listing".to_string(),
            ));
        }

        let mut rejected = RequestRepository::reject_pending_for_listing(pool, id, None).await?;
        Self::delete(pool, id).await?;
        // Requests submitted between the two statements above.
        rejected.extend(RequestRepository::reject_pending_for_listing(pool, id, None).await?);

        tracing::info!(listing_id = %id, rejected = rejected.len(), "listing withdrawn by owner");
        Ok(rejected)
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

/// Filters by case-insensitive substring on title (`want`) and skill
/// category (`offer`), then moves listings whose title mentions one of
/// `teachable_skills` to the front. Input order (newest first) is kept
/// within each group.
pub fn rank_listings(
    listings: Vec<Listing>,
    teachable_skills: &[String],
    want: Option<&str>,
    offer: Option<&str>,
) -> Vec<Listing> {
    let want = want.map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty());
    let offer = offer.map(|o| o.trim().to_lowercase()).filter(|o| !o.is_empty());

    let mut filtered: Vec<Listing> = listings
        .into_iter()
        .filter(|l| {
            want.as_ref().map_or(true, |w| l.title.to_lowercase().contains(w.as_str()))
                && offer
                    .as_ref()
                    .map_or(true, |o| l.skill_category.to_lowercase().contains(o.as_str()))
        })
        .collect();

    if !teachable_skills.is_empty() {
        // stable sort: matches first, recency preserved inside each group
        filtered.sort_by_key(|l| {
            let title = l.title.to_lowercase();
            !teachable_skills.iter().any(|s| title.contains(s.as_str()))
        });
    }

    filtered
}
