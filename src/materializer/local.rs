//! Local file-based content store.
//!
//! Every write goes to a temporary sibling file which is synced and then
//! renamed over the target, so a crash mid-write leaves the previous
//! content in place.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FabricError, Result, StoreError};

use super::store::ContentStore;

/// Default store directory name.
pub const STORE_DIR: &str = ".fabric";

/// Suffix of in-flight temporary files.
const TEMP_SUFFIX: &str = ".tmp";

/// Local file-based content store.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    /// Base directory for stored objects.
    base_dir: PathBuf,
}

impl LocalContentStore {
    /// Creates a store rooted at `.fabric` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| FabricError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STORE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory of the store.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Maps a key to a path, rejecting keys that escape the base directory.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::persistence(key, "invalid store key").into());
        }
        Ok(self.base_dir.join(relative))
    }
}

/// Writes `content` to a synced temporary sibling of `path`.
async fn stage(key: &str, path: &Path, content: &[u8]) -> Result<PathBuf> {
    let fail = |what: &str, e: std::io::Error| -> FabricError {
        StoreError::persistence(key, format!("{what}: {e}")).into()
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| fail("Failed to create directory", e))?;
    }

    // Unique per write so concurrent writers never share a temp file.
    let suffix = &Uuid::new_v4().to_string()[..8];
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{file_name}.{suffix}{TEMP_SUFFIX}"));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| fail("Failed to create temp file", e))?;
    let written = async {
        file.write_all(content).await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(fail("Failed to write temp file", e));
    }
    Ok(temp_path)
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No object at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(StoreError::Corrupted {
                key: key.to_string(),
                message: format!("Failed to read object: {e}"),
            }
            .into()),
        }
    }

    async fn write_atomic(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let temp_path = stage(key, &path, content).await?;

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::persistence(key, format!("Failed to replace object: {e}")).into());
        }

        debug!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    async fn create_new(&self, key: &str, content: &[u8]) -> Result<bool> {
        let path = self.path_for(key)?;
        let temp_path = stage(key, &path, content).await?;

        // Linking fails if the target exists, so only one writer wins.
        let linked = fs::hard_link(&temp_path, &path).await;
        let _ = fs::remove_file(&temp_path).await;
        match linked {
            Ok(()) => {
                debug!("Created {} ({} bytes)", path.display(), content.len());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::persistence(key, format!("Failed to create object: {e}")).into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::persistence(key, format!("Failed to delete object: {e}")).into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let dir = if prefix.is_empty() {
            self.base_dir.clone()
        } else {
            self.path_for(prefix)?
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            keys.push(if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            });
        }
        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
