use sqlx::{Executor, Pool, Sqlite};
use crate::db::models::{Profile, User};
use crate::db::{new_id, now_millis, ProfileRepository};
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    pub async fn create<'e, E>(
        executor: E,
        username: String,
        password_hash: &[u8; 32],
        password_salt: &[u8; 32],
    ) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = new_id();
        let created_at = now_millis();

        let user = sqlx::query_as::<_, User>(
            r#"
INSERT INTO users (id, username, password_hash, password_salt, created_at)
VALUES (?, ?, ?, ?, ?)
RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&username)
        .bind(password_hash.as_slice())
        .bind(password_salt.as_slice())
        .bind(created_at)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    /// Creates the account and its profile together; neither exists if
    /// either insert fails.
    pub async fn create_with_profile(
        pool: &Pool<Sqlite>,
        username: String,
        password_hash: &[u8; 32],
        password_salt: &[u8; 32],
        display_name: &str,
    ) -> Result<(User, Profile), AppError> {
        let mut tx = pool.begin().await?;

        let user = Self::create(&mut *tx, username, password_hash, password_salt).await?;
        let profile = ProfileRepository::create(&mut *tx, &user.id, display_name).await?;

        tx.commit().await?;
        Ok((user, profile))
    }

    pub async fn get_by_username(
        pool: &Pool<Sqlite>,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username = ?"
        )
        .bind(username)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn get_by_id(
        pool: &Pool<Sqlite>,
        id: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }
}
