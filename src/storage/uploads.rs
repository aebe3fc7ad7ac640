// Local storage for uploaded originals

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::types::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under the uploads directory as `file_name`.
    /// An existing file with the same name is overwritten.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let name = sanitize_file_name(file_name)
            .ok_or_else(|| AppError::InvalidRequest(format!("Invalid file name: {:?}", file_name)))?;

        fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&name);
        fs::write(&path, bytes).await?;

        info!(file = %name, bytes = bytes.len(), path = %path.display(), "Stored upload");
        Ok(path)
    }

    /// Remove a stored original; returns whether it existed
    pub async fn delete(&self, path: &Path) -> AppResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stored upload");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Stored upload already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Final path component of a client-supplied file name, or `None` when
/// nothing usable remains.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_keeps_last_component() {
        assert_eq!(sanitize_file_name("a.csv").as_deref(), Some("a.csv"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("  "), None);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        let path = store.save("a.csv", b"x\n1\n").await.unwrap();
        store.save("a.csv", b"x\n2\n").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"x\n2\n");
        assert!(path.starts_with(store.root()));

        assert!(tokio_test::assert_ok!(store.delete(&path).await));
        assert!(!tokio_test::assert_ok!(store.delete(&path).await));
    }

    #[tokio::test]
    async fn test_save_rejects_empty_name() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path());
        assert!(matches!(
            store.save("/", b"data").await,
            Err(AppError::InvalidRequest(_))
        ));
    }
}
