//! Local filesystem artifact storage.
//!
//! Accepts `file://` URIs and bare paths. Writes go to a hidden sibling file
//! first and are renamed into place, so a reader never sees a partial artifact.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use backchain_core::{BlobStore, Error, Result};
use tracing::debug;

const FILE_SCHEME: &str = "file://";

/// Blob store over the local filesystem (including mounted shares).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBlobStore;

impl LocalBlobStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Map a URI or bare path to a filesystem path.
    ///
    /// # Errors
    ///
    /// Returns an input error for other URI schemes or an empty location.
    pub fn resolve(uri: &str) -> Result<PathBuf> {
        let path = match uri.strip_prefix(FILE_SCHEME) {
            Some(rest) => rest,
            None if uri.contains("://") => {
                return Err(Error::invalid_argument(format!(
                    "Unsupported storage location '{uri}': only file:// and local paths are supported"
                )))
            }
            None => uri,
        };
        if path.trim().is_empty() {
            return Err(Error::invalid_argument("Storage location cannot be empty"));
        }
        Ok(PathBuf::from(path))
    }
}

/// Classify an I/O failure: permissions and missing paths will not fix themselves.
fn storage_error(action: &str, path: &Path, err: &std::io::Error) -> Error {
    let transient = !matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
    );
    Error::storage(
        transient,
        format!("Failed to {action} {}: {err}", path.display()),
    )
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error("create directory", parent, &e)),
        None => Ok(()),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "Could not remove temporary file");
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<()> {
        let path = Self::resolve(uri)?;
        ensure_parent(&path).await?;

        let temp = temp_sibling(&path);
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            remove_quietly(&temp).await;
            return Err(storage_error("write", &temp, &e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            remove_quietly(&temp).await;
            return Err(storage_error("move into place", &path, &e));
        }
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = Self::resolve(uri)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| storage_error("read", &path, &e))
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = Self::resolve(uri)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| storage_error("inspect", &path, &e))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = Self::resolve(uri)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", &path, &e)),
        }
    }

    async fn promote(&self, staged: &Path, uri: &str) -> Result<()> {
        let path = Self::resolve(uri)?;
        ensure_parent(&path).await?;

        if tokio::fs::rename(staged, &path).await.is_ok() {
            return Ok(());
        }

        // Different filesystem: copy beside the destination, then rename
        let temp = temp_sibling(&path);
        if let Err(e) = tokio::fs::copy(staged, &temp).await {
            remove_quietly(&temp).await;
            return Err(storage_error("copy", staged, &e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            remove_quietly(&temp).await;
            return Err(storage_error("move into place", &path, &e));
        }
        remove_quietly(staged).await;
        Ok(())
    }

    fn local_path(&self, uri: &str) -> Option<PathBuf> {
        Self::resolve(uri).ok()
    }
}
