pub mod auth;
pub mod chat;
pub mod feed;
pub mod listings;
pub mod middleware;
pub mod profiles;
pub mod requests;
pub mod state;

pub use state::AppState;
pub use middleware::RateLimiter;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
    middleware as axum_middleware,
};
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Uploads are served back from `media_root` under `/media`.
pub fn create_router(state: AppState, rate_limiter: Arc<RateLimiter>, media_root: &Path) -> Router {
    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))

        // Hive
        .route("/api/listings", get(listings::browse).post(listings::create))
        .route("/api/listings/:id", get(listings::get).delete(listings::withdraw))
        .route("/api/listings/:id/requests", post(listings::submit_request))

        // Match requests
        .route("/api/requests", get(requests::list))
        .route("/api/requests/:id/accept", post(requests::accept))
        .route("/api/requests/:id/reject", post(requests::reject))
        .route("/api/requests/:id/settle", post(requests::settle))

        // Conversations
        .route("/api/conversations", get(chat::list_conversations))
        .route(
            "/api/conversations/:id/messages",
            get(chat::get_messages).post(chat::send_message),
        )

        // Profiles and media
        .route("/api/profile", put(profiles::update_profile))
        .route("/api/profile/avatar", put(profiles::upload_avatar))
        .route("/api/profile/media", post(profiles::upload_media))
        .route(
            "/api/profile/media/:id",
            patch(profiles::update_caption).delete(profiles::delete_media),
        )
        .route("/api/profiles/:id", get(profiles::get_profile))
        .route("/api/profiles/:id/media", get(profiles::list_media))

        .route("/api/feed", get(feed::subscribe))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Room for multipart-free raw bodies up to the largest upload.
    let body_limit = state.config.max_video_bytes + 64 * 1024;
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        // Health check
        .route("/api/health", get(health))

        // Authentication endpoints
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))

        .merge(protected)
        .nest_service("/media", ServeDir::new(media_root))

        .layer(DefaultBodyLimit::max(body_limit))
        // Add rate limiting middleware
        .layer(axum_middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            middleware::rate_limit_middleware(limiter, req, next)
        }))
        // Add request timeout
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::feed::ChangeFeed;
    use crate::storage::{LocalObjectStore, UploadLimits, Uploads};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app(dir: &Path) -> Router {
        let config = Arc::new(Config::default());
        let store = Arc::new(LocalObjectStore::new(dir, "/media"));
        let state = AppState {
            db: test_pool().await,
            feed: ChangeFeed::new(config.feed_capacity),
            uploads: Uploads::new(store, UploadLimits::from_config(&config)),
            config,
        };
        create_router(state, Arc::new(RateLimiter::new(1000, 60)), dir)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn json(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn sign_up(app: &Router, username: &str) -> String {
        let (status, _) = call(
            app,
            json(
                "POST",
                "/api/auth/register",
                None,
                serde_json::json!({"username": username, "password": "correct horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            app,
            json(
                "POST",
                "/api/auth/login",
                None,
                serde_json::json!({"username": username, "password": "correct horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["session_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn protected_routes_need_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (status, body) = call(&app, json("GET", "/api/requests", None, serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "auth");
    }

    #[tokio::test]
    async fn swap_flow_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;
        let ada = sign_up(&app, "ada").await;
        let bob = sign_up(&app, "bob").await;

        let (status, listing) = call(
            &app,
            json(
                "POST",
                "/api/listings",
                Some(&ada),
                serde_json::json!({
                    "title": "Guitar",
                    "skill_category": "Rust",
                    "experience_level": "Intermediate",
                    "description": "weekends",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let listing_id = listing["id"].as_str().unwrap();

        let (status, request) = call(
            &app,
            json(
                "POST",
                &format!("/api/listings/{}/requests", listing_id),
                Some(&bob),
                serde_json::json!({"swap_conditions": "an hour a week"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let request_id = request["id"].as_str().unwrap();

        // only the recipient may respond
        let (status, _) = call(
            &app,
            json("POST", &format!("/api/requests/{}/accept", request_id), Some(&bob), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, settlement) = call(
            &app,
            json("POST", &format!("/api/requests/{}/accept", request_id), Some(&ada), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settlement["request"]["status"], "accepted");
        assert_eq!(settlement["listing_removed"], true);

        let (status, body) = call(
            &app,
            json("POST", &format!("/api/requests/{}/reject", request_id), Some(&ada), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "This request has already been processed");

        let (status, conversations) =
            call(&app, json("GET", "/api/conversations", Some(&bob), serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conversations.as_array().unwrap().len(), 1);
        assert_eq!(conversations[0]["counterparty_label"], "ada");
    }
}
