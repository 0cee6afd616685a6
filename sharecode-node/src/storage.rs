//! Upload root and blob storage.

use std::path::{Path, PathBuf};

use sharecode_core::naming;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot create upload dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Process-wide upload directory. Created once, left for the OS to clean.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: root.clone(),
                source,
            })?;
        // Offers are registered by absolute path.
        let root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write `content` as `<uuid>_<sanitized display name>` and return its path.
    pub async fn store(&self, display_name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.root.join(naming::stored_file_name(display_name));
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Remove a served or expired blob. Missing files are fine.
pub async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "blob removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove blob"),
    }
}
