//! Captured message records and their JSON-lines encoding.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

use crate::{Error, Result};

/// One captured message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredMessage", into = "StoredMessage")]
pub struct CapturedMessage {
    /// Owning topic (fully qualified)
    pub topic: String,

    /// Position in broker delivery order, starting at 0
    pub sequence: u64,

    /// Original message id, unique within the topic
    pub message_id: String,

    /// Raw payload
    pub content: Vec<u8>,

    /// User properties
    pub properties: BTreeMap<String, String>,

    /// Broker publish time (epoch milliseconds)
    pub publish_timestamp: u64,

    /// Producer event time (epoch milliseconds)
    pub event_timestamp: Option<u64>,

    /// Routing key
    pub partition_key: Option<String>,
}

impl CapturedMessage {
    /// Id used when the broker reports none:
    /// hex sha256 over content, publish time and sequence.
    pub fn synthesize_id(content: &[u8], publish_timestamp: u64, sequence: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update(publish_timestamp.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Encode as a single JSON line, newline included
    pub fn to_json_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// How `content` is encoded on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentEncoding {
    Utf8,
    Base64,
}

/// On-disk shape of a captured message
#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    topic: String,
    #[serde(default)]
    sequence: u64,
    message_id: String,
    content: String,
    content_encoding: ContentEncoding,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    publish_timestamp: u64,
    #[serde(default)]
    event_timestamp: Option<u64>,
    #[serde(default)]
    partition_key: Option<String>,
}

impl From<CapturedMessage> for StoredMessage {
    fn from(msg: CapturedMessage) -> Self {
        let (content, content_encoding) = match String::from_utf8(msg.content) {
            Ok(text) => (text, ContentEncoding::Utf8),
            Err(e) => (STANDARD.encode(e.into_bytes()), ContentEncoding::Base64),
        };
        Self {
            topic: msg.topic,
            sequence: msg.sequence,
            message_id: msg.message_id,
            content,
            content_encoding,
            properties: msg.properties,
            publish_timestamp: msg.publish_timestamp,
            event_timestamp: msg.event_timestamp,
            partition_key: msg.partition_key,
        }
    }
}

impl TryFrom<StoredMessage> for CapturedMessage {
    type Error = String;

    fn try_from(stored: StoredMessage) -> std::result::Result<Self, Self::Error> {
        let content = match stored.content_encoding {
            ContentEncoding::Utf8 => stored.content.into_bytes(),
            ContentEncoding::Base64 => STANDARD
                .decode(stored.content.as_bytes())
                .map_err(|e| format!("invalid base64 content: {}", e))?,
        };
        Ok(Self {
            topic: stored.topic,
            sequence: stored.sequence,
            message_id: stored.message_id,
            content,
            properties: stored.properties,
            publish_timestamp: stored.publish_timestamp,
            event_timestamp: stored.event_timestamp.filter(|ts| *ts != 0),
            partition_key: stored.partition_key,
        })
    }
}

/// Result of parsing one line of a record file
#[derive(Debug)]
pub enum ParsedRecord {
    Message(CapturedMessage),
    /// Corrupt line, reported as `Error::Format`
    Corrupt(Error),
}

/// Parse a JSON-lines record file.
///
/// A line that fails to parse becomes [`ParsedRecord::Corrupt`]. The final
/// line is dropped with a warning instead when it is unterminated, since that
/// is what an interrupted append leaves behind.
pub fn parse_records(key: &str, data: &[u8]) -> Vec<ParsedRecord> {
    let mut records = Vec::new();
    let ends_cleanly = data.last().map_or(true, |b| *b == b'\n');
    let lines: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    let count = lines.len();

    for (i, line) in lines.into_iter().enumerate() {
        let is_tail = i + 1 == count;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<CapturedMessage>(line) {
            Ok(msg) => records.push(ParsedRecord::Message(msg)),
            Err(e) if is_tail && !ends_cleanly => {
                warn!(
                    "Ignoring torn trailing record in {} at line {}: {}",
                    key,
                    i + 1,
                    e
                );
            }
            Err(e) => records.push(ParsedRecord::Corrupt(Error::Format {
                key: key.to_string(),
                line: i + 1,
                message: e.to_string(),
            })),
        }
    }

    records
}
