use sqlx::{Pool, Sqlite};

use crate::db::models::{MediaKind, SkillMedia};
use crate::db::{new_id, now_millis};
use crate::error::AppError;

pub struct MediaRepository;

impl MediaRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        profile_id: &str,
        kind: MediaKind,
        title: &str,
        object_key: &str,
        object_url: &str,
    ) -> Result<SkillMedia, AppError> {
        let media = sqlx::query_as::<_, SkillMedia>(
            r#"
INSERT INTO skill_media (id, profile_id, media_kind, title, object_key, object_url, caption, created_at)
VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(profile_id)
        .bind(kind)
        .bind(title)
        .bind(object_key)
        .bind(object_url)
        .bind(now_millis())
        .fetch_one(pool)
        .await?;

        Ok(media)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<SkillMedia>, AppError> {
        let media = sqlx::query_as::<_, SkillMedia>("SELECT * FROM skill_media WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(media)
    }

    /// Newest first.
    pub async fn list_for_profile(
        pool: &Pool<Sqlite>,
        profile_id: &str,
    ) -> Result<Vec<SkillMedia>, AppError> {
        let media = sqlx::query_as::<_, SkillMedia>(
            "SELECT * FROM skill_media WHERE profile_id = ? ORDER BY created_at DESC, rowid DESC"
        )
        .bind(profile_id)
        .fetch_all(pool)
        .await?;

        Ok(media)
    }

    async fn get_owned(pool: &Pool<Sqlite>, owner: &str, id: &str) -> Result<SkillMedia, AppError> {
        let media = Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("media {}", id)))?;

        if media.profile_id != owner {
            return Err(AppError::Authorization("Only the owner can change this media".to_string()));
        }
        Ok(media)
    }

    /// Blank captions clear the caption.
    pub async fn update_caption(
        pool: &Pool<Sqlite>,
        owner: &str,
        id: &str,
        caption: Option<&str>,
    ) -> Result<SkillMedia, AppError> {
        Self::get_owned(pool, owner, id).await?;

        let caption = caption.map(str::trim).filter(|c| !c.is_empty());
        let media = sqlx::query_as::<_, SkillMedia>(
            "UPDATE skill_media SET caption = ? WHERE id = ? RETURNING *"
        )
        .bind(caption)
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(media)
    }

    /// Deletes the row and returns it so the caller can remove the object.
    pub async fn delete(pool: &Pool<Sqlite>, owner: &str, id: &str) -> Result<SkillMedia, AppError> {
        let media = Self::get_owned(pool, owner, id).await?;

        sqlx::query("DELETE FROM skill_media WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(media)
    }
}
