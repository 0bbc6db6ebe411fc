//! Scoped storage for images uploaded during the edit and variation flows
//!
//! A [`TempUpload`] owns its file: dropping it deletes the file, so every
//! exit path of a handler (success, gateway error, cancel) cleans up.

use super::state::Upload;
use crate::error::{BotError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A file on local disk that is removed when dropped
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    original_name: String,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove upload {}: {}", self.path.display(), e),
        }
    }
}

/// Writes validated uploads into a private directory
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reject anything that is not a PNG within the size limit
    pub fn validate(&self, upload: &Upload) -> Result<()> {
        if upload.bytes.is_empty() {
            return Err(BotError::InvalidUpload("the file is empty".to_string()));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(BotError::InvalidUpload(format!(
                "{} bytes exceeds the {} byte limit",
                upload.bytes.len(),
                self.max_bytes
            )));
        }
        if !upload.bytes.starts_with(PNG_SIGNATURE) {
            return Err(BotError::InvalidUpload("the file is not a PNG image".to_string()));
        }
        Ok(())
    }

    /// Validate and persist an upload under a fresh name
    pub async fn save(&self, upload: &Upload) -> Result<TempUpload> {
        self.validate(upload)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{}.png", Uuid::new_v4()));
        tokio::fs::write(&path, &upload.bytes).await?;
        debug!(
            "Stored upload {} ({} bytes) at {}",
            upload.file_name,
            upload.bytes.len(),
            path.display()
        );

        Ok(TempUpload {
            path,
            original_name: upload.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn png(len: usize) -> Upload {
        let mut data = PNG_SIGNATURE.to_vec();
        data.resize(len.max(PNG_SIGNATURE.len()), 0);
        Upload {
            file_name: "photo.png".to_string(),
            bytes: Bytes::from(data),
        }
    }

    fn store(max_bytes: usize) -> UploadStore {
        UploadStore::new(
            std::env::temp_dir().join(format!("xen-uploads-{}", Uuid::new_v4())),
            max_bytes,
        )
    }

    #[tokio::test]
    async fn test_save_and_drop_removes_file() {
        let store = store(1024);
        let upload = store.save(&png(64)).await.unwrap();
        let path = upload.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(upload.original_name(), "photo.png");

        drop(upload);
        assert!(!path.exists());
        std::fs::remove_dir_all(store.dir()).ok();
    }

    #[test]
    fn test_rejects_non_png() {
        let store = store(1024);
        let upload = Upload {
            file_name: "photo.jpg".to_string(),
            bytes: Bytes::from_static(b"\xff\xd8\xff\xe0 jpeg"),
        };
        assert!(matches!(store.validate(&upload), Err(BotError::InvalidUpload(_))));
    }

    #[test]
    fn test_rejects_oversized_and_empty() {
        let store = store(100);
        assert!(store.validate(&png(101)).is_err());
        assert!(store.validate(&png(100)).is_ok());

        let empty = Upload {
            file_name: "empty.png".to_string(),
            bytes: Bytes::new(),
        };
        assert!(store.validate(&empty).is_err());
    }
}
