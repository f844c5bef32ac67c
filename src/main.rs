use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillswap::{
    api::{create_router, AppState, RateLimiter},
    config::Config,
    db::SessionRepository,
    error::AppError,
    feed::ChangeFeed,
    storage::{LocalObjectStore, UploadLimits, Uploads},
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skillswap=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SkillSwap server v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!("Configuration loaded");

    let connect_options: SqliteConnectOptions = config
        .database_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .foreign_keys(true);

    // Setup database with proper connection pooling
    let db = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await?;

    tracing::info!("Database connected: {}", config.database_url);

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;

    tracing::info!("Database migrations completed");

    let store = Arc::new(LocalObjectStore::new(&config.media_dir, "/media"));
    tokio::fs::create_dir_all(store.root()).await?;
    let uploads = Uploads::new(store.clone(), UploadLimits::from_config(&config));
    tracing::info!("Object store rooted at {}", store.root().display());

    let feed = ChangeFeed::new(config.feed_capacity);

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute, 60));
    tracing::info!("Rate limiter configured ({} req/min per IP)", config.rate_limit_per_minute);

    // Create shared application state
    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        feed,
        uploads,
    };

    // Spawn background task for session cleanup
    {
        let db_clone = db.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600)); // Every hour
            loop {
                interval.tick().await;
                match SessionRepository::cleanup_expired(&db_clone).await {
                    Ok(removed) => tracing::debug!(removed, "Expired sessions cleaned up"),
                    Err(e) => tracing::error!("Session cleanup failed: {}", e),
                }
            }
        });
        tracing::info!("Session cleanup task started (runs hourly)");
    }

    // Spawn background task for rate limiter cleanup
    {
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                limiter.cleanup().await;
                tracing::debug!("Rate limiter cache cleaned up");
            }
        });
    }

    // Build router
    let app = create_router(state, rate_limiter, store.root());

    // Bind and serve
    let addr = config.server_address();
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/api/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
