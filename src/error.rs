use thiserror::Error;

use crate::workflow::Step;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not allowed: {0}")]
    Authorization(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Acceptance partially applied (completed: {completed:?}, failed at {failed:?}): {source}")]
    PartialApplication {
        completed: Vec<Step>,
        failed: Step,
        #[source]
        source: Box<AppError>,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn already_processed() -> Self {
        AppError::Conflict("This request has already been processed".to_string())
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Authorization(_) => "authorization",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Store(_) => "store",
            AppError::PartialApplication { .. } => "partial_application",
            AppError::Auth(_) => "auth",
            AppError::Storage(_) => "storage",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether re-invoking the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Store(_) | AppError::Storage(_) | AppError::PartialApplication { .. } => true,
            _ => false,
        }
    }
}

// Implement From for common error types
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration failed: {}", err))
    }
}

// Axum IntoResponse implementation for HTTP errors
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let kind = self.kind();
        let retryable = self.is_retryable();

        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Store(err) => {
                tracing::error!("store error: {}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Could not reach the database. Please try again.".to_string(),
                )
            }
            AppError::PartialApplication { completed, failed, source } => {
                tracing::error!(?completed, ?failed, "acceptance partially applied: {}", source);
                let done: Vec<String> = completed.iter().map(|s| s.to_string()).collect();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "Request was accepted but {} did not complete (done: {}). Retry accepting to finish.",
                        failed,
                        done.join(", ")
                    ),
                )
            }
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Storage(msg) => {
                tracing::error!("object storage error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "File storage is unavailable. Please try again.".to_string(),
                )
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
            "kind": kind,
            "retryable": retryable,
        });

        (status, axum::Json(body)).into_response()
    }
}
