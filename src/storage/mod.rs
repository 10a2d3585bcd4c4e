//! Upload storage
//!
//! Local-disk storage for lesson attachments (audio and PDF files). Files
//! are written under the configured uploads directory and referenced by
//! their public `/uploads/...` URL, which is served by the router.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Local-disk store for uploaded lesson attachments
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory files are stored under
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save an attachment for a lesson and return its public URL.
    ///
    /// The stored filename is `{lesson_id}_{kind}{ext}`, so re-uploading an
    /// attachment of the same kind replaces the previous file.
    pub async fn save(
        &self,
        lesson_id: &str,
        kind: &str,
        original_name: Option<&str>,
        data: &[u8],
    ) -> Result<String> {
        let ext = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let filename = format!("{}_{}{}", lesson_id, kind, ext);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&filename), data).await?;

        Ok(format!("/uploads/{}", filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> UploadStore {
        let dir = std::env::temp_dir().join(format!("lingolift-test-{}", uuid::Uuid::new_v4()));
        UploadStore::new(dir)
    }

    #[tokio::test]
    async fn test_save_returns_public_url() {
        let store = temp_store();

        let url = store
            .save("lesson-1", "audio", Some("recording.mp3"), b"data")
            .await
            .unwrap();

        assert_eq!(url, "/uploads/lesson-1_audio.mp3");
        let on_disk = store.dir().join("lesson-1_audio.mp3");
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_save_without_extension() {
        let store = temp_store();

        let url = store.save("lesson-2", "pdf", None, b"pdf").await.unwrap();

        assert_eq!(url, "/uploads/lesson-2_pdf");
    }
}
