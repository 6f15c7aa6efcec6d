use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{domain::FileId, Result};

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// A generated file as reported by the image agent (not yet downloaded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub file_id: FileId,
    /// Reported file type, e.g. `png`. May be missing.
    pub file_type: Option<String>,
}

impl ImageRef {
    /// File extension safe to use in a local path. Falls back to `png`.
    pub fn extension(&self) -> String {
        self.file_type
            .as_deref()
            .map(|t| t.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|t| !t.is_empty() && t.len() <= 5 && t.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "png".to_string())
    }
}

/// Downloaded image bytes held in a temp file.
///
/// The file is removed when this value is dropped, whether or not the reply
/// carrying it was delivered.
#[derive(Debug)]
pub struct TempImage {
    path: PathBuf,
}

impl TempImage {
    /// Write `bytes` to a fresh file under `dir`.
    pub async fn write(dir: &Path, extension: &str, bytes: &[u8]) -> Result<Self> {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);

        // Guard first so a partial write is cleaned up too.
        let img = Self {
            path: dir.join(format!("post_{ts}_{n}.{extension}")),
        };
        tokio::fs::write(&img.path, bytes).await?;
        tracing::debug!(path = %img.path.display(), size = bytes.len(), "wrote temp image");
        Ok(img)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed temp image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to remove temp image: {e}")
            }
        }
    }
}

/// Result of one generation request.
#[derive(Debug)]
pub struct GeneratedPost {
    pub text: String,
    pub image: Option<TempImage>,
    /// Why the image is missing, when it is.
    pub image_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_ref(file_type: Option<&str>) -> ImageRef {
        ImageRef {
            file_id: FileId("f".to_string()),
            file_type: file_type.map(str::to_string),
        }
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(image_ref(Some("PNG")).extension(), "png");
        assert_eq!(image_ref(Some(".jpeg")).extension(), "jpeg");
        assert_eq!(image_ref(Some("../../x")).extension(), "png");
        assert_eq!(image_ref(None).extension(), "png");
    }

    #[tokio::test]
    async fn temp_image_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let img = TempImage::write(dir.path(), "png", b"\x89PNG").await.unwrap();
        let path = img.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG");

        drop(img);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn temp_image_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = TempImage::write(dir.path(), "png", b"a").await.unwrap();
        let b = TempImage::write(dir.path(), "png", b"b").await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn write_into_missing_dir_fails_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(TempImage::write(&missing, "png", b"x").await.is_err());
        assert!(!missing.exists());
    }
}
