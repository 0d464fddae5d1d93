//! Sequential read over a topic and, for partitioned topics, each partition.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cluster::{MessagingClient, ReceivedMessage, TopicReader};
use crate::inventory::TopicName;
use crate::Result;

/// Reads every available message of a topic from the earliest position.
///
/// Partitions are drained in index order. A partition is exhausted once no
/// message arrives within the read timeout.
pub struct TopicStream {
    client: Arc<dyn MessagingClient>,
    targets: Vec<String>,
    current: usize,
    reader: Option<Box<dyn TopicReader>>,
    read_timeout: Duration,
}

impl TopicStream {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        topic: &TopicName,
        partitions: u32,
        read_timeout: Duration,
    ) -> Self {
        let targets = if partitions == 0 {
            vec![topic.to_string()]
        } else {
            (0..partitions)
                .map(|i| topic.partition(i).to_string())
                .collect()
        };

        Self {
            client,
            targets,
            current: 0,
            reader: None,
            read_timeout,
        }
    }

    /// Next message, or `None` once every partition is exhausted
    pub async fn next(&mut self) -> Result<Option<ReceivedMessage>> {
        while let Some(target) = self.targets.get(self.current) {
            if self.reader.is_none() {
                debug!("Opening reader on {}", target);
                self.reader = Some(self.client.open_reader(target).await?);
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            match reader.next_message(self.read_timeout).await? {
                Some(message) => return Ok(Some(message)),
                None => {
                    debug!("{} exhausted", target);
                    self.reader = None;
                    self.current += 1;
                }
            }
        }
        Ok(None)
    }
}
