use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::storage::{validate_key, ObjectStore};

/// Filesystem-backed store; objects live at `<root>/<bucket>/<key>` and are
/// served under `<url_prefix>/<bucket>/<key>`.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf, AppError> {
        validate_key(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, AppError> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    AppError::Conflict(format!("Object {}/{} already exists", bucket, key))
                }
                _ => AppError::from(e),
            })?;
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(bucket, key, size = bytes.len(), "object stored");
        Ok(self.reference(bucket, key))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), AppError> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn reference(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, bucket, key)
    }
}
