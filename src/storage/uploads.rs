use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::db::{now_millis, MediaKind, MediaRepository, Profile, ProfileRepository, SkillMedia};
use crate::error::AppError;
use crate::storage::{ObjectStore, AVATAR_BUCKET};

#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    pub max_image_bytes: usize,
    pub max_video_bytes: usize,
}

impl UploadLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_image_bytes: config.max_image_bytes,
            max_video_bytes: config.max_video_bytes,
        }
    }

    pub fn max_for(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Photo => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        }
    }

    fn check(&self, kind: MediaKind, size: usize) -> Result<(), AppError> {
        let max = self.max_for(kind);
        if size == 0 {
            return Err(AppError::Validation("File is empty".to_string()));
        }
        if size > max {
            return Err(AppError::Validation(format!(
                "File size must be less than {}MB",
                max / (1024 * 1024)
            )));
        }
        Ok(())
    }
}

/// Avatar and skill media uploads: validation, object placement and the
/// matching database rows.
#[derive(Clone)]
pub struct Uploads {
    store: Arc<dyn ObjectStore>,
    limits: UploadLimits,
}

impl Uploads {
    pub fn new(store: Arc<dyn ObjectStore>, limits: UploadLimits) -> Self {
        Self { store, limits }
    }

    /// Replaces the owner's avatar. Images only.
    pub async fn set_avatar(
        &self,
        pool: &Pool<Sqlite>,
        owner: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Profile, AppError> {
        if MediaKind::from_content_type(content_type) != Some(MediaKind::Photo) {
            return Err(AppError::Validation("Please upload an image file".to_string()));
        }
        self.limits.check(MediaKind::Photo, bytes.len())?;

        let key = object_key(owner, file_name);
        let url = self.store.put(AVATAR_BUCKET, &key, bytes).await?;

        let previous = match ProfileRepository::set_avatar(pool, owner, &key, &url).await {
            Ok(previous) => previous,
            Err(e) => {
                self.discard(AVATAR_BUCKET, &key).await;
                return Err(e);
            }
        };

        if let Some(old_key) = previous.filter(|k| k != &key) {
            self.discard(AVATAR_BUCKET, &old_key).await;
        }

        ProfileRepository::get_required(pool, owner).await
    }

    /// Stores a photo or video in the owner's showcase.
    pub async fn upload_media(
        &self,
        pool: &Pool<Sqlite>,
        owner: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<SkillMedia, AppError> {
        let kind = MediaKind::from_content_type(content_type)
            .ok_or_else(|| AppError::Validation("Please upload a video or image file".to_string()))?;
        self.limits.check(kind, bytes.len())?;

        let key = object_key(owner, file_name);
        let url = self.store.put(kind.bucket(), &key, bytes).await?;

        let title = file_name.trim();
        let title = if title.is_empty() { key.as_str() } else { title };

        match MediaRepository::create(pool, owner, kind, title, &key, &url).await {
            Ok(media) => Ok(media),
            Err(e) => {
                self.discard(kind.bucket(), &key).await;
                Err(e)
            }
        }
    }

    /// Deletes the row first, then the object, so a failure can only leave
    /// an unreferenced object behind.
    pub async fn delete_media(
        &self,
        pool: &Pool<Sqlite>,
        owner: &str,
        id: &str,
    ) -> Result<SkillMedia, AppError> {
        let media = MediaRepository::delete(pool, owner, id).await?;
        self.discard(media.media_kind.bucket(), &media.object_key).await;
        Ok(media)
    }

    async fn discard(&self, bucket: &str, key: &str) {
        if let Err(e) = self.store.remove(bucket, key).await {
            tracing::warn!(bucket, key, "failed to remove object: {}", e);
        }
    }
}

/// `<owner>/<millis>-<random>.<ext>`, extension taken from the file name.
fn object_key(owner: &str, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}-{}.{}", owner, now_millis(), &nonce[..8], ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_identity, test_pool};
    use crate::storage::LocalObjectStore;
    use tempfile::tempdir;

    fn uploads(root: &std::path::Path) -> Uploads {
        Uploads::new(
            Arc::new(LocalObjectStore::new(root, "/media")),
            UploadLimits { max_image_bytes: 16, max_video_bytes: 64 },
        )
    }

    #[test]
    fn keys_keep_extension_and_owner_namespace() {
        let key = object_key("u1", "Holiday.JPG");
        assert!(key.starts_with("u1/"));
        assert!(key.ends_with(".jpg"));
        assert!(object_key("u1", "noext").ends_with(".bin"));
        assert!(object_key("u1", "x.p/ng").ends_with(".bin"));
    }

    #[tokio::test]
    async fn media_kind_and_limits_are_enforced() {
        let dir = tempdir().unwrap();
        let pool = test_pool().await;
        let owner = test_identity(&pool, "Ada").await;
        let uploads = uploads(dir.path());

        let err = uploads
            .upload_media(&pool, &owner, "notes.pdf", "application/pdf", b"pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = uploads
            .upload_media(&pool, &owner, "big.png", "image/png", &[0u8; 17])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // same size is fine as a video
        let video = uploads
            .upload_media(&pool, &owner, "clip.mp4", "video/mp4", &[0u8; 17])
            .await
            .unwrap();
        assert_eq!(video.media_kind, MediaKind::Video);
        assert!(video.object_url.starts_with("/media/skill_videos/"));
        assert!(dir.path().join("skill_videos").join(&video.object_key).exists());

        let removed = uploads.delete_media(&pool, &owner, &video.id).await.unwrap();
        assert!(!dir.path().join("skill_videos").join(&removed.object_key).exists());
        assert!(MediaRepository::list_for_profile(&pool, &owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_avatar_replaces_old_object() {
        let dir = tempdir().unwrap();
        let pool = test_pool().await;
        let owner = test_identity(&pool, "Ada").await;
        let uploads = uploads(dir.path());

        let err = uploads
            .set_avatar(&pool, &owner, "clip.mp4", "video/mp4", b"v")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let first = uploads.set_avatar(&pool, &owner, "a.png", "image/png", b"one").await.unwrap();
        let first_key = first.avatar_key.clone().unwrap();
        let second = uploads.set_avatar(&pool, &owner, "b.png", "image/png", b"two").await.unwrap();

        assert_ne!(first.avatar_url, second.avatar_url);
        assert!(!dir.path().join(AVATAR_BUCKET).join(&first_key).exists());
        assert!(dir
            .path()
            .join(AVATAR_BUCKET)
            .join(second.avatar_key.unwrap())
            .exists());
    }
}
