//! Content-addressed photo storage on the local filesystem.
//!
//! Locators have the form `<category>/<sha256>.jpg` and are relative to the
//! store root. Uploading the same bytes twice yields the same locator and
//! writes the file once.

use faceclock_core::{PhotoCategory, PhotoStorage, StoreError};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalPhotoStore {
    root: PathBuf,
}

impl LocalPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locator the given bytes are stored under.
    pub fn locator_for(bytes: &[u8], category: PhotoCategory) -> String {
        format!("{}/{:x}.jpg", category.as_str(), Sha256::digest(bytes))
    }

    /// Map a locator to a path under the root, rejecting anything that could
    /// escape it.
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(locator);
        let mut components = relative.components().peekable();
        if components.peek().is_none() {
            return Err(StoreError::InvalidLocator(locator.to_string()));
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(StoreError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub async fn read(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(locator.to_string())
            } else {
                StoreError::Unavailable(format!("{}: {e}", path.display()))
            }
        })
    }
}

impl PhotoStorage for LocalPhotoStore {
    async fn upload(&self, bytes: &[u8], category: PhotoCategory) -> Result<String, StoreError> {
        let locator = Self::locator_for(bytes, category);
        let path = self.resolve(&locator)?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(locator = %locator, "photo already stored");
            return Ok(locator);
        }

        let io_err = |e: std::io::Error| StoreError::Unavailable(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // Write then rename so a reader never sees a partial file.
        let tmp = path.with_extension("jpg.part");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        tracing::debug!(locator = %locator, bytes = bytes.len(), "photo stored");
        Ok(locator)
    }
}
