//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Trait for capture-set storage backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write a whole object. Readers never observe a partial write.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Append to an object, creating it if absent. Durable on return.
    async fn append(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read data from a key
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// List keys with a given prefix, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the size of an object
    async fn size(&self, key: &str) -> Result<u64>;
}
