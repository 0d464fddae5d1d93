//! In-memory storage backend for testing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::StorageBackend;
use crate::error::StorageError;
use crate::{Error, Result};

/// In-memory storage backend using object_store
///
/// Nothing persists between runs. Appends are a read-modify-write guarded by
/// a single lock since object stores have no native append.
pub struct MemoryBackend {
    store: Arc<InMemory>,
    append_lock: Mutex<()>,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            append_lock: Mutex::new(()),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let path = Path::from(key);
        match self.store.get(&path).await {
            Ok(result) => result.bytes().await.map(Some).map_err(|e| {
                Error::Storage(StorageError::Backend(format!("Failed to read bytes: {}", e)))
            }),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::Storage(StorageError::Backend(format!(
                "Memory GET failed: {}",
                e
            )))),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Path::from(key);
        self.store
            .put(&path, PutPayload::from_bytes(data))
            .await
            .map_err(|e| Error::Storage(StorageError::Backend(format!("Memory PUT failed: {}", e))))?;
        Ok(())
    }

    async fn append(&self, key: &str, data: Bytes) -> Result<()> {
        let _guard = self.append_lock.lock().await;

        let combined = match self.read(key).await? {
            Some(existing) => {
                let mut buf = BytesMut::with_capacity(existing.len() + data.len());
                buf.extend_from_slice(&existing);
                buf.extend_from_slice(&data);
                buf.freeze()
            }
            None => data,
        };

        self.put(key, combined).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.read(key)
            .await?
            .ok_or_else(|| Error::Storage(StorageError::NotFound(key.to_string())))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let mut keys = Vec::new();
        let mut stream = self.store.list(Some(&prefix_path));

        while let Some(result) = stream.next().await {
            match result {
                Ok(meta) => keys.push(meta.location.to_string()),
                Err(e) => {
                    return Err(Error::Storage(StorageError::Backend(format!(
                        "Memory LIST failed: {}",
                        e
                    ))));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = Path::from(key);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::Storage(StorageError::Backend(format!(
                "Memory HEAD failed: {}",
                e
            )))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        self.store
            .delete(&path)
            .await
            .map_err(|e| Error::Storage(StorageError::Backend(format!("Memory DELETE failed: {}", e))))?;
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let path = Path::from(key);
        let meta = self.store.head(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                Error::Storage(StorageError::NotFound(key.to_string()))
            }
            _ => Error::Storage(StorageError::Backend(format!("Memory HEAD failed: {}", e))),
        })?;

        Ok(meta.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = MemoryBackend::new();

        let key = "c1/manifest.json";
        let data = Bytes::from("{}");
        backend.put(key, data.clone()).await.unwrap();

        assert_eq!(backend.get(key).await.unwrap(), data);
        assert!(backend.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_line() {
        let backend = Arc::new(MemoryBackend::new());
        let key = "c1/cursors/default/00000-a.jsonl";

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .append(key, Bytes::from(format!("{}\n", i)))
                        .await
                        .unwrap();
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        let data = backend.get(key).await.unwrap();
        let text = String::from_utf8(data.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 16);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let backend = MemoryBackend::new();

        backend.put("c1/manifest.json", Bytes::from("{}")).await.unwrap();
        backend
            .append("c1/messages/00000-a.jsonl", Bytes::from("x\n"))
            .await
            .unwrap();
        backend.put("c2/manifest.json", Bytes::from("{}")).await.unwrap();

        assert_eq!(backend.list("").await.unwrap().len(), 3);
        assert_eq!(backend.list("c1").await.unwrap().len(), 2);

        backend.delete("c1/manifest.json").await.unwrap();
        assert!(!backend.exists("c1/manifest.json").await.unwrap());
        assert!(backend.get("c1/manifest.json").await.is_err());
    }

    #[tokio::test]
    async fn test_size() {
        let backend = MemoryBackend::new();
        backend
            .append("k", Bytes::from("Hello, World!"))
            .await
            .unwrap();
        assert_eq!(backend.size("k").await.unwrap(), 13);
    }
}
