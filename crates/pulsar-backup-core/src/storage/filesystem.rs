//! Filesystem storage backend implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StorageBackend;
use crate::error::StorageError;
use crate::Result;

const TEMP_SUFFIX: &str = ".partial";

/// Filesystem-based storage backend
#[derive(Debug)]
pub struct FilesystemBackend {
    base_path: PathBuf,
    temp_counter: AtomicU64,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base path
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// Convert a storage key to a filesystem path
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let normalized = key.trim_start_matches('/');
        let relative = Path::new(normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::InvalidPath(key.to_string()).into());
        }
        Ok(self.base_path.join(relative))
    }

    /// Convert a filesystem path to a storage key
    fn path_to_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.base_path)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Backend(format!("Failed to create directories: {}", e))
            })?;
        }
        Ok(())
    }
}

fn not_found_or_backend(key: &str, action: &str, path: &Path, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Backend(format!("Failed to {} {}: {}", action, path.display(), e))
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.key_to_path(key)?;
        Self::ensure_parent(&path).await?;

        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut temp = path.clone().into_os_string();
        temp.push(format!(".{}.{}{}", std::process::id(), n, TEMP_SUFFIX));
        let temp = PathBuf::from(temp);

        let mut file = fs::File::create(&temp).await.map_err(|e| {
            StorageError::Backend(format!("Failed to create file {}: {}", temp.display(), e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::Backend(format!("Failed to write to file {}: {}", temp.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::Backend(format!("Failed to sync file {}: {}", temp.display(), e))
        })?;
        drop(file);

        fs::rename(&temp, &path).await.map_err(|e| {
            StorageError::Backend(format!(
                "Failed to rename {} to {}: {}",
                temp.display(),
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    async fn append(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.key_to_path(key)?;
        Self::ensure_parent(&path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                StorageError::Backend(format!("Failed to open file {}: {}", path.display(), e))
            })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::Backend(format!("Failed to append to file {}: {}", path.display(), e))
        })?;
        file.sync_data().await.map_err(|e| {
            StorageError::Backend(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found_or_backend(key, "read file", &path, e))?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.key_to_path(prefix)?;
        let mut results = Vec::new();

        if !fs::try_exists(&base).await.unwrap_or(false) {
            return Ok(results);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let metadata = fs::metadata(&dir).await.map_err(|e| {
                StorageError::Backend(format!("Failed to stat {}: {}", dir.display(), e))
            })?;
            if metadata.is_file() {
                if let Some(key) = self.path_to_key(&dir) {
                    results.push(key);
                }
                continue;
            }

            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                StorageError::Backend(format!("Failed to read directory {}: {}", dir.display(), e))
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                StorageError::Backend(format!("Failed to read directory entry: {}", e))
            })? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| {
                    StorageError::Backend(format!("Failed to stat {}: {}", path.display(), e))
                })?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Some(key) = self.path_to_key(&path) {
                    // In-flight whole-object writes
                    if !key.ends_with(TEMP_SUFFIX) {
                        results.push(key);
                    }
                }
            }
        }

        results.sort();
        Ok(results)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key)?;
        fs::try_exists(&path).await.map_err(|e| {
            StorageError::Backend(format!("Failed to stat {}: {}", path.display(), e)).into()
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_backend(key, "delete file", &path, e))?;
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let path = self.key_to_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_backend(key, "get metadata for", &path, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf());

        let key = "c1/manifest.json";
        let data = Bytes::from("{\"state\":\"in_progress\"}");

        backend.put(key, data.clone()).await.unwrap();
        assert_eq!(backend.get(key).await.unwrap(), data);

        // Overwrite replaces the whole object
        backend.put(key, Bytes::from("{}")).await.unwrap();
        assert_eq!(backend.get(key).await.unwrap(), Bytes::from("{}"));
    }

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf());

        let key = "c1/messages/00000-persistent___t1_ns1_a.jsonl";
        backend.append(key, Bytes::from("{\"n\":1}\n")).await.unwrap();
        backend.append(key, Bytes::from("{\"n\":2}\n")).await.unwrap();

        let data = backend.get(key).await.unwrap();
        assert_eq!(data, Bytes::from("{\"n\":1}\n{\"n\":2}\n"));
        assert_eq!(backend.size(key).await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_scoped() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf());

        backend.put("c1/manifest.json", Bytes::from("{}")).await.unwrap();
        backend
            .append("c1/messages/00001-b.jsonl", Bytes::from("x\n"))
            .await
            .unwrap();
        backend
            .append("c1/messages/00000-a.jsonl", Bytes::from("x\n"))
            .await
            .unwrap();
        backend.put("c2/manifest.json", Bytes::from("{}")).await.unwrap();

        assert_eq!(backend.list("").await.unwrap().len(), 4);
        assert_eq!(
            backend.list("c1/messages").await.unwrap(),
            vec!["c1/messages/00000-a.jsonl", "c1/messages/00001-b.jsonl"]
        );
        assert!(backend.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf());

        let key = "c1/inventory.jsonl";
        backend.put(key, Bytes::from("data")).await.unwrap();
        backend.delete(key).await.unwrap();
        assert!(!backend.exists(key).await.unwrap());

        let err = backend.get(key).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Storage(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(temp_dir.path().to_path_buf());

        let err = backend
            .put("../escape.json", Bytes::from("{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Storage(StorageError::InvalidPath(_))
        ));
    }
}
