//! Binary object storage for avatars and skill media.

pub mod local;
pub mod uploads;

use async_trait::async_trait;

use crate::error::AppError;

pub use local::LocalObjectStore;
pub use uploads::{UploadLimits, Uploads};

pub const AVATAR_BUCKET: &str = "avatars";

/// Objects are addressed by bucket and a key namespaced by owner id
/// (`<owner>/<name>`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` and returns a retrievable reference. Existing objects
    /// are never overwritten.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, AppError>;

    /// Removing an absent object succeeds.
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), AppError>;

    fn reference(&self, bucket: &str, key: &str) -> String;
}

/// Rejects keys that could escape their bucket.
pub fn validate_key(bucket: &str, key: &str) -> Result<(), AppError> {
    let ok_segment = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    if !ok_segment(bucket) || key.split('/').any(|s| !ok_segment(s)) {
        return Err(AppError::Validation(format!("Invalid object key {}/{}", bucket, key)));
    }
    Ok(())
}
