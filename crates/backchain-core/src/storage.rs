//! Artifact storage seam.
//!
//! Locations are URIs (`file:///...`) or bare paths. The engine can only write
//! to a local path, so the executor stages artifacts locally and then
//! [`BlobStore::promote`]s them to their destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` to `uri`, replacing any existing object.
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read the object at `uri`.
    async fn get(&self, uri: &str) -> Result<Vec<u8>>;

    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Remove the object at `uri`. Removing a missing object is not an error.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Move a staged local file to `uri`.
    ///
    /// The default reads the staged file and uploads it; stores backed by the
    /// local filesystem override this with a rename.
    async fn promote(&self, staged: &Path, uri: &str) -> Result<()> {
        let bytes = tokio::fs::read(staged).await?;
        self.put(uri, bytes).await
    }

    /// Local filesystem path for `uri`, when the engine can read it in place.
    fn local_path(&self, _uri: &str) -> Option<PathBuf> {
        None
    }
}
