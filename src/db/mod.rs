pub mod models;
pub mod users;
pub mod sessions;
pub mod profiles;
pub mod listings;
pub mod requests;
pub mod conversations;
pub mod messages;
pub mod media;

pub use models::{
    Conversation, ConversationSummary, ExperienceLevel, Listing, MatchRequest, MediaKind, Message,
    Profile, RequestDetails, RequestStatus, Session, SkillMedia, User,
};
pub use users::UserRepository;
pub use sessions::SessionRepository;
pub use profiles::ProfileRepository;
pub use listings::{ListingRepository, NewListing};
pub use requests::RequestRepository;
pub use conversations::ConversationRepository;
pub use messages::MessageRepository;
pub use media::MediaRepository;

/// Milliseconds since the Unix epoch; all stored timestamps use this unit.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Single-connection in-memory database with migrations applied.
#[cfg(test)]
pub async fn test_pool() -> sqlx::Pool<sqlx::Sqlite> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// File-backed database with several connections, so statements issued by
/// concurrent tasks really interleave.
#[cfg(test)]
pub async fn test_file_pool(dir: &std::path::Path) -> sqlx::Pool<sqlx::Sqlite> {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(dir.join("skillswap.db"))
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30));
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Pending requests whose listing no longer exists. Must always be zero.
#[cfg(test)]
pub async fn test_orphaned_pending(pool: &sqlx::Pool<sqlx::Sqlite>) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        r#"
SELECT COUNT(*) FROM requests r
WHERE r.status = 'pending'
  AND NOT EXISTS (SELECT 1 FROM listings l WHERE l.id = r.listing_id)
        "#,
    )
    .fetch_one(pool)
    .await
    .unwrap();
    count
}

/// Creates a user and its profile, returning the identity id.
#[cfg(test)]
pub async fn test_identity(pool: &sqlx::Pool<sqlx::Sqlite>, name: &str) -> String {
    let salt = [7u8; 32];
    let hash = [9u8; 32];
    let user = UserRepository::create(pool, name.to_lowercase(), &hash, &salt)
        .await
        .unwrap();
    ProfileRepository::create(pool, &user.id, name).await.unwrap();
    user.id
}

#[cfg(test)]
pub fn test_listing(title: &str, offer: &str) -> NewListing {
    NewListing {
        title: title.to_string(),
        skill_category: offer.to_string(),
        experience_level: ExperienceLevel::Beginner,
        location: None,
        description: format!("I want to learn {}", title),
        display_name: None,
    }
}
