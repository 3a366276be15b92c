//! Content store trait definition.
//!
//! This module defines the byte-keyed persistence interface the
//! materializer writes baselines, the run lock and run reports through.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for content storage backends.
///
/// Keys are relative, `/`-separated paths such as `configs/dub-ssp1.json`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Reads an object.
    ///
    /// Returns `None` if the key does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes an object so that readers see either the old or the new
    /// content, never a partial write.
    async fn write_atomic(&self, key: &str, content: &[u8]) -> Result<()>;

    /// Writes an object only if the key does not exist yet. Readers see
    /// either nothing or the whole content.
    ///
    /// Returns `false`, writing nothing, if the key already exists.
    async fn create_new(&self, key: &str, content: &[u8]) -> Result<bool>;

    /// Deletes an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Checks if an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Lists keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
