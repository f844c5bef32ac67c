use sqlx::{Executor, Pool, Sqlite};
use crate::db::models::Profile;
use crate::db::now_millis;
use crate::error::AppError;

pub struct ProfileRepository;

impl ProfileRepository {
    pub async fn create<'e, E>(
        executor: E,
        id: &str,
        display_name: &str,
    ) -> Result<Profile, AppError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
INSERT INTO profiles (id, display_name, tagline, teachable_skills, updated_at)
VALUES (?, ?, '', '', ?)
RETURNING *
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(now_millis())
        .fetch_one(executor)
        .await?;

        Ok(profile)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Profile>, AppError> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(profile)
    }

    pub async fn get_required(pool: &Pool<Sqlite>, id: &str) -> Result<Profile, AppError> {
        Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile {}", id)))
    }

    /// Only the owner may edit; `owner` is the calling identity.
    pub async fn update(
        pool: &Pool<Sqlite>,
        owner: &str,
        display_name: &str,
        tagline: &str,
        teachable_skills: &str,
    ) -> Result<Profile, AppError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name cannot be empty".to_string()));
        }

        let profile = sqlx::query_as::<_, Profile>(
            r#"
UPDATE profiles
SET display_name = ?, tagline = ?, teachable_skills = ?, updated_at = ?
WHERE id = ?
RETURNING *
            "#,
        )
        .bind(display_name)
        .bind(tagline.trim())
        .bind(teachable_skills.trim())
        .bind(now_millis())
        .bind(owner)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("profile {}", owner)))?;

        Ok(profile)
    }

    /// Stores the new avatar and returns the previous object key, if any.
    pub async fn set_avatar(
        pool: &Pool<Sqlite>,
        owner: &str,
        avatar_key: &str,
        avatar_url: &str,
    ) -> Result<Option<String>, AppError> {
        let previous = Self::get_required(pool, owner).await?.avatar_key;

        sqlx::query("UPDATE profiles SET avatar_key = ?, avatar_url = ?, updated_at = ? WHERE id = ?")
            .bind(avatar_key)
            .bind(avatar_url)
            .bind(now_millis())
            .bind(owner)
            .execute(pool)
            .await?;

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_identity, test_pool};

    #[tokio::test]
    async fn update_profile_fields() {
        let pool = test_pool().await;
        let id = test_identity(&pool, "Ada").await;

        let profile = ProfileRepository::update(&pool, &id, " Ada L ", "numbers", "Rust, math")
            .await
            .unwrap();
        assert_eq!(profile.display_name, "Ada L");
        assert_eq!(profile.teachable_skill_list(), vec!["rust", "math"]);
    }

    #[tokio::test]
    async fn blank_display_name_rejected() {
        let pool = test_pool().await;
        let id = test_identity(&pool, "Ada").await;
        let err = ProfileRepository::update(&pool, &id, "  ", "", "").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn set_avatar_returns_previous_key() {
        let pool = test_pool().await;
        let id = test_identity(&pool, "Ada").await;

        let first = ProfileRepository::set_avatar(&pool, &id, "k1", "/media/avatars/k1").await.unwrap();
        assert!(first.is_none());
        let second = ProfileRepository::set_avatar(&pool, &id, "k2", "/media/avatars/k2").await.unwrap();
        assert_eq!(second.as_deref(), Some("k1"));

        let profile = ProfileRepository::get_required(&pool, &id).await.unwrap();
        assert_eq!(profile.avatar_url.as_deref(), Some("/media/avatars/k2"));
    }
}
