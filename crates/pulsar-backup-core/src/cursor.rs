//! Durable replay cursor.
//!
//! A cursor is named, so one capture set can be replayed into several
//! clusters with separate progress. Each topic has its own shard: an
//! append-only JSON-lines log where the last entry for a message id wins.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::StorageError;
use crate::manifest::{cursor_key, CaptureManifest, TopicCapture};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Replay state of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    Replayed,
    Failed,
}

/// One cursor log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub message_id: String,
    pub status: CursorStatus,
    /// Publish attempts made in the run that wrote this entry
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    /// Entry time (epoch milliseconds)
    pub at: i64,
}

/// Cursor over one capture set
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    capture_id: String,
    name: String,
}

impl ReplayCursor {
    pub fn new(capture_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            capture_id: capture_id.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage key of a topic's shard
    pub fn shard_key(&self, topic: &TopicCapture) -> String {
        cursor_key(&self.capture_id, &self.name, topic)
    }

    /// Load a topic's shard. A missing shard is empty.
    pub async fn open_shard(
        &self,
        storage: Arc<dyn StorageBackend>,
        topic: &TopicCapture,
    ) -> Result<CursorShard> {
        CursorShard::load(storage, self.shard_key(topic)).await
    }

    /// Whether any replay has run under this cursor
    pub async fn exists(&self, storage: &dyn StorageBackend) -> Result<bool> {
        let prefix = format!("{}/cursors/{}", self.capture_id, self.name);
        Ok(!storage.list(&prefix).await?.is_empty())
    }

    /// Replay progress per manifest topic
    pub async fn progress(
        &self,
        storage: Arc<dyn StorageBackend>,
        manifest: &CaptureManifest,
    ) -> Result<Vec<ShardProgress>> {
        let mut progress = Vec::with_capacity(manifest.topics.len());
        for topic in &manifest.topics {
            let shard = self.open_shard(storage.clone(), topic).await?;
            progress.push(ShardProgress {
                topic: topic.topic.clone(),
                captured: topic.message_count,
                replayed: shard.replayed_count(),
                failed: shard.failed_count(),
            });
        }
        Ok(progress)
    }
}

/// Replay progress for one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardProgress {
    pub topic: String,
    pub captured: u64,
    pub replayed: usize,
    pub failed: usize,
}

/// Replay state for one topic
pub struct CursorShard {
    storage: Arc<dyn StorageBackend>,
    key: String,
    entries: HashMap<String, CursorEntry>,
    /// Set when the log ends in a torn line that must be terminated first
    needs_newline: bool,
}

impl CursorShard {
    async fn load(storage: Arc<dyn StorageBackend>, key: String) -> Result<Self> {
        let data = match storage.get(&key).await {
            Ok(data) => data,
            Err(Error::Storage(StorageError::NotFound(_))) => Bytes::new(),
            Err(e) => return Err(e),
        };

        let needs_newline = data.last().is_some_and(|b| *b != b'\n');
        let mut entries = HashMap::new();
        let text = String::from_utf8_lossy(&data);
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CursorEntry>(line) {
                Ok(entry) => {
                    entries.insert(entry.message_id.clone(), entry);
                }
                // An unreadable entry only costs a re-publish of that message
                Err(e) => warn!("Skipping unreadable cursor entry in {} at line {}: {}", key, i + 1, e),
            }
        }

        Ok(Self {
            storage,
            key,
            entries,
            needs_newline,
        })
    }

    pub fn is_replayed(&self, message_id: &str) -> bool {
        self.entries
            .get(message_id)
            .is_some_and(|e| e.status == CursorStatus::Replayed)
    }

    pub fn status(&self, message_id: &str) -> Option<CursorStatus> {
        self.entries.get(message_id).map(|e| e.status)
    }

    pub fn replayed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == CursorStatus::Replayed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == CursorStatus::Failed)
            .count()
    }

    /// Record a successful publish; durable on return
    pub async fn mark_replayed(&mut self, message_id: &str, attempts: u32) -> Result<()> {
        self.append(CursorEntry {
            message_id: message_id.to_string(),
            status: CursorStatus::Replayed,
            attempts,
            error: None,
            at: chrono::Utc::now().timestamp_millis(),
        })
        .await
    }

    /// Record an exhausted or unpublishable message; durable on return
    pub async fn mark_failed(&mut self, message_id: &str, attempts: u32, error: &str) -> Result<()> {
        self.append(CursorEntry {
            message_id: message_id.to_string(),
            status: CursorStatus::Failed,
            attempts,
            error: Some(error.to_string()),
            at: chrono::Utc::now().timestamp_millis(),
        })
        .await
    }

    async fn append(&mut self, entry: CursorEntry) -> Result<()> {
        let mut line = if self.needs_newline {
            "\n".to_string()
        } else {
            String::new()
        };
        line.push_str(&serde_json::to_string(&entry)?);
        line.push('\n');
        self.storage.append(&self.key, Bytes::from(line)).await?;
        self.needs_newline = false;
        self.entries.insert(entry.message_id.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::message_key;
    use crate::storage::MemoryBackend;

    fn topic() -> TopicCapture {
        TopicCapture::new(
            "persistent://t1/ns1/a",
            message_key("c1", 0, "persistent://t1/ns1/a"),
        )
    }

    #[tokio::test]
    async fn test_last_entry_wins_across_reloads() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let cursor = ReplayCursor::new("c1", "default");
        let topic = topic();

        let mut shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        assert!(!shard.is_replayed("m1"));
        shard.mark_failed("m1", 5, "timeout").await.unwrap();
        shard.mark_replayed("m2", 1).await.unwrap();

        let mut shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        assert_eq!(shard.status("m1"), Some(CursorStatus::Failed));
        assert!(shard.is_replayed("m2"));
        shard.mark_replayed("m1", 2).await.unwrap();

        let shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        assert!(shard.is_replayed("m1"));
        assert_eq!(shard.replayed_count(), 2);
        assert_eq!(shard.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_named_cursors_are_independent() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let topic = topic();

        let primary = ReplayCursor::new("c1", "primary");
        let dr = ReplayCursor::new("c1", "dr");

        let mut shard = primary.open_shard(storage.clone(), &topic).await.unwrap();
        shard.mark_replayed("m1", 1).await.unwrap();

        let shard = dr.open_shard(storage.clone(), &topic).await.unwrap();
        assert!(!shard.is_replayed("m1"));
        assert!(primary.exists(storage.as_ref()).await.unwrap());
        assert!(!dr.exists(storage.as_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn test_torn_entry_skipped() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let cursor = ReplayCursor::new("c1", "default");
        let topic = topic();

        let mut shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        shard.mark_replayed("m1", 1).await.unwrap();
        storage
            .append(&cursor.shard_key(&topic), Bytes::from("{\"message_id\":\"m2\",\"sta"))
            .await
            .unwrap();

        let mut shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        assert!(shard.is_replayed("m1"));
        assert_eq!(shard.status("m2"), None);

        // The next entry lands on its own line
        shard.mark_replayed("m3", 1).await.unwrap();
        let shard = cursor.open_shard(storage.clone(), &topic).await.unwrap();
        assert!(shard.is_replayed("m3"));
    }
}
