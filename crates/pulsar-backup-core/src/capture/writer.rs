//! Per-topic record file writer.

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cluster::ReceivedMessage;
use crate::error::StorageError;
use crate::record::CapturedMessage;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Totals for one captured topic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub message_count: u64,
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
}

/// Assigns sequence numbers and topic-unique ids to delivered messages
#[derive(Debug, Default)]
pub struct RecordSequencer {
    topic: String,
    next_sequence: u64,
    seen_ids: HashSet<String>,
}

impl RecordSequencer {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Turn a delivered message into a record with a topic-unique id
    pub fn next_record(&mut self, received: ReceivedMessage) -> CapturedMessage {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let base_id = received.message_id.unwrap_or_else(|| {
            CapturedMessage::synthesize_id(&received.content, received.publish_timestamp, sequence)
        });
        let message_id = if self.seen_ids.contains(&base_id) {
            format!("{}#{}", base_id, sequence)
        } else {
            base_id
        };
        self.seen_ids.insert(message_id.clone());

        CapturedMessage {
            topic: self.topic.clone(),
            sequence,
            message_id,
            content: received.content,
            properties: received.properties,
            publish_timestamp: received.publish_timestamp,
            event_timestamp: received.event_timestamp.filter(|ts| *ts != 0),
            partition_key: received.partition_key,
        }
    }
}

/// Appends captured messages to a topic's record file, one durable line each
pub struct CaptureWriter {
    storage: Arc<dyn StorageBackend>,
    key: String,
    sequencer: RecordSequencer,
    stats: TopicStats,
}

impl CaptureWriter {
    /// Start a fresh record file, discarding any partial one from an earlier attempt
    pub async fn create(
        storage: Arc<dyn StorageBackend>,
        key: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self> {
        let key = key.into();
        match storage.delete(&key).await {
            Ok(()) | Err(Error::Storage(StorageError::NotFound(_))) => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            storage,
            key,
            sequencer: RecordSequencer::new(topic),
            stats: TopicStats::default(),
        })
    }

    /// Append a message; the line is durable when this returns
    pub async fn write(&mut self, received: ReceivedMessage) -> Result<()> {
        let record = self.sequencer.next_record(received);
        let line = record.to_json_line()?;
        self.storage.append(&self.key, Bytes::from(line)).await?;

        self.stats.message_count += 1;
        self.stats.first_timestamp.get_or_insert(record.publish_timestamp);
        self.stats.last_timestamp = Some(record.publish_timestamp);
        Ok(())
    }

    pub fn stats(&self) -> TopicStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{parse_records, ParsedRecord};
    use crate::storage::MemoryBackend;
    use std::collections::BTreeMap;

    fn received(id: Option<&str>, content: &str, ts: u64) -> ReceivedMessage {
        ReceivedMessage {
            message_id: id.map(str::to_string),
            content: content.as_bytes().to_vec(),
            properties: BTreeMap::new(),
            publish_timestamp: ts,
            event_timestamp: Some(0),
            partition_key: None,
        }
    }

    #[tokio::test]
    async fn test_ids_are_unique_per_topic() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mut writer = CaptureWriter::create(storage.clone(), "c1/messages/00000-a.jsonl", "a")
            .await
            .unwrap();

        writer.write(received(Some("1:0:-1:-1"), "x", 10)).await.unwrap();
        writer.write(received(Some("1:0:-1:-1"), "y", 11)).await.unwrap();
        writer.write(received(None, "z", 12)).await.unwrap();

        let data = storage.get("c1/messages/00000-a.jsonl").await.unwrap();
        let ids: Vec<_> = parse_records("k", &data)
            .into_iter()
            .map(|r| match r {
                ParsedRecord::Message(m) => {
                    assert_eq!(m.event_timestamp, None);
                    m.message_id
                }
                ParsedRecord::Corrupt(e) => panic!("unexpected corrupt record: {}", e),
            })
            .collect();

        assert_eq!(ids[0], "1:0:-1:-1");
        assert_eq!(ids[1], "1:0:-1:-1#1");
        assert_eq!(ids[2], CapturedMessage::synthesize_id(b"z", 12, 2));

        let stats = writer.stats();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.first_timestamp, Some(10));
        assert_eq!(stats.last_timestamp, Some(12));
    }

    #[tokio::test]
    async fn test_create_replaces_partial_file() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        storage
            .append("k.jsonl", Bytes::from("stale\n"))
            .await
            .unwrap();

        let mut writer = CaptureWriter::create(storage.clone(), "k.jsonl", "a")
            .await
            .unwrap();
        writer.write(received(Some("1:0:-1:-1"), "fresh", 1)).await.unwrap();

        let data = storage.get("k.jsonl").await.unwrap();
        assert_eq!(parse_records("k.jsonl", &data).len(), 1);
    }
}
