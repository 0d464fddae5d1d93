//! Capture-set storage.
//!
//! Capture sets are written through the [`StorageBackend`] trait so the
//! engines never touch the medium directly:
//!
//! - **Filesystem**: local directory tree, durable appends
//! - **Memory**: in-memory store (for testing)

mod backend;
mod config;
mod filesystem;
mod memory;

pub use backend::StorageBackend;
pub use config::StorageBackendConfig;
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;

use crate::Result;
use std::sync::Arc;

/// Create a storage backend from configuration.
///
/// # Example
///
/// ```rust,ignore
/// use pulsar_backup_core::storage::{create_backend, StorageBackendConfig};
///
/// let backend = create_backend(&StorageBackendConfig::Memory)?;
/// ```
pub fn create_backend(config: &StorageBackendConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageBackendConfig::Filesystem { path } => {
            Ok(Arc::new(FilesystemBackend::new(path.clone())))
        }
        StorageBackendConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_create_memory_backend() {
        let backend = create_backend(&StorageBackendConfig::Memory).unwrap();

        backend
            .append("c1/messages/00000-t.jsonl", Bytes::from("a\n"))
            .await
            .unwrap();
        backend
            .append("c1/messages/00000-t.jsonl", Bytes::from("b\n"))
            .await
            .unwrap();

        let data = backend.get("c1/messages/00000-t.jsonl").await.unwrap();
        assert_eq!(data, Bytes::from("a\nb\n"));
    }

    #[tokio::test]
    async fn test_create_filesystem_backend() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StorageBackendConfig::Filesystem {
            path: temp_dir.path().to_path_buf(),
        };
        let backend = create_backend(&config).unwrap();

        backend
            .put("c1/manifest.json", Bytes::from("{}"))
            .await
            .unwrap();
        assert!(backend.exists("c1/manifest.json").await.unwrap());
        assert!(temp_dir.path().join("c1/manifest.json").is_file());
    }
}
