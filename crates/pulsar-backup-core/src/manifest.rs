//! Capture manifest and capture-set layout.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::inventory::{Inventory, InventoryCounts};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Current capture-set format version
pub const FORMAT_VERSION: u32 = 1;

/// Lifecycle of a capture set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    InProgress,
    Completed,
}

/// Outcome of capturing one topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Completed,
    Failed,
}

/// Top-level capture-set manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureManifest {
    /// Capture set label
    pub capture_id: String,

    /// Layout version the set was written with
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    /// Creation timestamp (epoch milliseconds)
    pub created_at: i64,

    /// Completion timestamp (epoch milliseconds)
    #[serde(default)]
    pub completed_at: Option<i64>,

    pub state: CaptureState,

    /// Source service URL
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub inventory: InventoryCounts,

    /// Branches skipped during enumeration
    #[serde(default)]
    pub warnings: Vec<String>,

    /// One entry per inventory topic, in inventory order
    #[serde(default)]
    pub topics: Vec<TopicCapture>,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl CaptureManifest {
    /// Create a new in-progress manifest
    pub fn new(capture_id: impl Into<String>) -> Self {
        Self {
            capture_id: capture_id.into(),
            format_version: FORMAT_VERSION,
            created_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            state: CaptureState::InProgress,
            source: None,
            inventory: InventoryCounts::default(),
            warnings: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// Get or create the entry for a topic, assigning the next file index
    pub fn get_or_create_topic(&mut self, topic: &str) -> &mut TopicCapture {
        let position = match self.topics.iter().position(|t| t.topic == topic) {
            Some(position) => position,
            None => {
                let key = message_key(&self.capture_id, self.topics.len(), topic);
                self.topics.push(TopicCapture::new(topic, key));
                self.topics.len() - 1
            }
        };
        &mut self.topics[position]
    }

    pub fn topic(&self, topic: &str) -> Option<&TopicCapture> {
        self.topics.iter().find(|t| t.topic == topic)
    }

    pub fn is_completed(&self) -> bool {
        self.state == CaptureState::Completed
    }

    /// Mark the capture set complete
    pub fn complete(&mut self) {
        self.state = CaptureState::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Total messages across all topics
    pub fn total_messages(&self) -> u64 {
        self.topics.iter().map(|t| t.message_count).sum()
    }

    pub fn failed_topics(&self) -> impl Iterator<Item = &TopicCapture> {
        self.topics
            .iter()
            .filter(|t| t.status == TopicStatus::Failed)
    }

    /// Load the manifest of a capture set
    pub async fn load(storage: &dyn StorageBackend, capture_id: &str) -> Result<Self> {
        let key = manifest_key(capture_id);
        let data = storage.get(&key).await.map_err(|e| match e {
            Error::Storage(crate::error::StorageError::NotFound(_)) => {
                Error::CaptureSetNotFound(capture_id.to_string())
            }
            other => other,
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist the manifest as pretty JSON
    pub async fn save(&self, storage: &dyn StorageBackend) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage
            .put(&manifest_key(&self.capture_id), Bytes::from(json))
            .await
    }
}

/// Per-topic capture metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCapture {
    /// Fully-qualified topic name
    pub topic: String,

    /// Storage key of the record file
    pub key: String,

    pub message_count: u64,

    pub status: TopicStatus,

    #[serde(default)]
    pub error: Option<String>,

    /// First publish timestamp (epoch milliseconds)
    #[serde(default)]
    pub first_timestamp: Option<u64>,

    /// Last publish timestamp (epoch milliseconds)
    #[serde(default)]
    pub last_timestamp: Option<u64>,
}

impl TopicCapture {
    pub fn new(topic: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            message_count: 0,
            status: TopicStatus::Completed,
            error: None,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Record file stem shared by the message file and cursor shards
    pub fn file_stem(&self) -> &str {
        let name = self.key.rsplit('/').next().unwrap_or(&self.key);
        name.strip_suffix(".jsonl").unwrap_or(name)
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_topic(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<capture_id>/manifest.json`
pub fn manifest_key(capture_id: &str) -> String {
    format!("{}/manifest.json", capture_id)
}

/// `<capture_id>/inventory.jsonl`
pub fn inventory_key(capture_id: &str) -> String {
    format!("{}/inventory.jsonl", capture_id)
}

/// `<capture_id>/messages/<NNNNN>-<sanitized-topic>.jsonl`
pub fn message_key(capture_id: &str, index: usize, topic: &str) -> String {
    format!(
        "{}/messages/{:05}-{}.jsonl",
        capture_id,
        index,
        sanitize_topic(topic)
    )
}

/// `<capture_id>/cursors/<cursor_name>/<stem>.jsonl`
pub fn cursor_key(capture_id: &str, cursor_name: &str, topic: &TopicCapture) -> String {
    format!(
        "{}/cursors/{}/{}.jsonl",
        capture_id,
        cursor_name,
        topic.file_stem()
    )
}

/// Persist the inventory of a capture set
pub async fn save_inventory(
    storage: &dyn StorageBackend,
    capture_id: &str,
    inventory: &Inventory,
) -> Result<()> {
    storage
        .put(&inventory_key(capture_id), Bytes::from(inventory.to_jsonl()?))
        .await
}

/// Load the inventory of a capture set
pub async fn load_inventory(storage: &dyn StorageBackend, capture_id: &str) -> Result<Inventory> {
    let key = inventory_key(capture_id);
    let data = storage.get(&key).await.map_err(|e| match e {
        Error::Storage(crate::error::StorageError::NotFound(_)) => {
            Error::CaptureSetNotFound(capture_id.to_string())
        }
        other => other,
    })?;
    Inventory::from_jsonl(&key, &data)
}

/// Ids of every capture set in storage, sorted
pub async fn list_capture_sets(storage: &dyn StorageBackend) -> Result<Vec<String>> {
    let mut ids: Vec<String> = storage
        .list("")
        .await?
        .into_iter()
        .filter_map(|key| {
            key.strip_suffix("/manifest.json")
                .filter(|id| !id.contains('/'))
                .map(str::to_string)
        })
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}
