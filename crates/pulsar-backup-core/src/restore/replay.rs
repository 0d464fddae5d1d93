//! Message replay with a durable cursor.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cluster::{self, MessagingClient, OutgoingMessage, TopicPublisher};
use crate::config::{Config, Operation, ReplayOptions};
use crate::cursor::{CursorShard, ReplayCursor};
use crate::error::{ClusterError, StorageError};
use crate::filter::TopicFilter;
use crate::manifest::{CaptureManifest, TopicCapture, TopicStatus};
use crate::record::{parse_records, CapturedMessage, ParsedRecord};
use crate::report::{ReplayReport, ReplayTotals, TopicReplaySummary};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::storage::{create_backend, StorageBackend};
use crate::{Error, Result};

/// Lazily opened publisher, dropped after a failed publish so the next
/// attempt reconnects
type PublisherSlot = Arc<Mutex<Option<Box<dyn TopicPublisher>>>>;

/// Replays a capture set's messages into a target cluster
pub struct ReplayEngine {
    capture_id: String,
    options: ReplayOptions,
    client: Arc<dyn MessagingClient>,
    storage: Arc<dyn StorageBackend>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ReplayEngine {
    /// Create a replay engine connected to the configured target
    pub async fn new(config: &Config, capture_id: impl Into<String>) -> Result<Self> {
        config.validate_for(Operation::Replay)?;
        let target = config.target()?;

        let client = cluster::connect_client(target).await?;
        let storage = create_backend(&config.storage)?;
        Ok(Self::with_components(
            capture_id,
            config.replay.clone(),
            client,
            storage,
        ))
    }

    /// Create a replay engine over already-built components
    pub fn with_components(
        capture_id: impl Into<String>,
        options: ReplayOptions,
        client: Arc<dyn MessagingClient>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            capture_id: capture_id.into(),
            options,
            client,
            storage,
            shutdown_tx,
        }
    }

    /// Cursor this engine records progress in
    pub fn cursor(&self) -> ReplayCursor {
        ReplayCursor::new(&self.capture_id, &self.options.cursor_name)
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Publish every captured message not yet replayed under this cursor
    pub async fn replay_messages(&self) -> Result<ReplayReport> {
        let started = Instant::now();
        let manifest = CaptureManifest::load(self.storage.as_ref(), &self.capture_id).await?;
        if !manifest.is_completed() {
            warn!(
                "Capture set {} is not completed; replaying the topics captured so far",
                self.capture_id
            );
        }

        let filter = TopicFilter::new(&self.options.topics)?;
        let cursor = self.cursor();

        let mut selected = Vec::new();
        let mut skipped_topics = Vec::new();
        for topic in &manifest.topics {
            if !filter.matches(&topic.topic) {
                debug!("{} not selected for replay", topic.topic);
                continue;
            }
            match topic.status {
                TopicStatus::Completed => selected.push(topic.clone()),
                TopicStatus::Failed => {
                    warn!(
                        "Skipping {}: capture failed ({})",
                        topic.topic,
                        topic.error.as_deref().unwrap_or("unknown error")
                    );
                    skipped_topics.push(topic.topic.clone());
                }
            }
        }

        info!(
            "Replaying {} topics of {} with cursor {} (max {} concurrent)",
            selected.len(),
            self.capture_id,
            cursor.name(),
            self.options.max_concurrent_topics
        );

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_topics));
        let mut shutdown = Shutdown::new(self.shutdown_receiver());
        let mut cancelled = false;
        let mut handles = Vec::new();
        let mut names = Vec::new();

        for topic in selected {
            let name = topic.topic.clone();
            let task = TopicReplayTask {
                topic,
                cursor: cursor.clone(),
                client: self.client.clone(),
                storage: self.storage.clone(),
                retry: self.options.retry_policy(),
                publish_timeout: self.options.publish_timeout(),
                shutdown: Shutdown::new(self.shutdown_receiver()),
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            if shutdown.is_signalled() {
                info!("Shutdown signal received, not starting further topics");
                cancelled = true;
                break;
            }

            names.push(name);
            handles.push(tokio::spawn(async move {
                let result = task.run().await;
                drop(permit);
                result
            }));
        }

        let mut topics = Vec::with_capacity(handles.len());
        let results = futures::future::join_all(handles).await;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok((summary, topic_cancelled)) => {
                    cancelled |= topic_cancelled;
                    topics.push(summary);
                }
                Err(e) => {
                    error!("Replay task for {} failed: {}", name, e);
                    let mut summary = TopicReplaySummary::new(name);
                    summary.error = Some(format!("replay task failed: {}", e));
                    topics.push(summary);
                }
            }
        }

        let mut report = ReplayReport {
            capture_id: self.capture_id.clone(),
            cursor: cursor.name().to_string(),
            topics,
            skipped_topics,
            totals: ReplayTotals::default(),
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        report.compute_totals();

        info!(
            "Replay of {} finished: {} replayed, {} skipped, {} failed",
            self.capture_id, report.totals.replayed, report.totals.skipped, report.totals.failed
        );
        Ok(report)
    }
}

/// Context for replaying a single topic
struct TopicReplayTask {
    topic: TopicCapture,
    cursor: ReplayCursor,
    client: Arc<dyn MessagingClient>,
    storage: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
    publish_timeout: Duration,
    shutdown: Shutdown,
}

impl TopicReplayTask {
    /// Replay the topic; returns its summary and whether it was cancelled
    async fn run(mut self) -> (TopicReplaySummary, bool) {
        let mut summary = TopicReplaySummary::new(&self.topic.topic);
        let slot: PublisherSlot = Arc::new(Mutex::new(None));

        let result = self.replay(&slot, &mut summary).await;

        if let Some(mut publisher) = slot.lock().await.take() {
            if let Err(e) = publisher.close().await {
                warn!("Failed to close producer on {}: {}", self.topic.topic, e);
            }
        }

        match result {
            Ok(cancelled) => {
                info!(
                    "Replayed {}: {} published, {} skipped, {} failed",
                    summary.topic, summary.replayed, summary.skipped, summary.failed
                );
                (summary, cancelled)
            }
            Err(e) => {
                error!("Replay of {} stopped: {}", summary.topic, e);
                summary.error = Some(e.to_string());
                (summary, false)
            }
        }
    }

    async fn replay(&mut self, slot: &PublisherSlot, summary: &mut TopicReplaySummary) -> Result<bool> {
        let data = match self.storage.get(&self.topic.key).await {
            Ok(data) => data,
            // Empty topics leave no record file
            Err(Error::Storage(StorageError::NotFound(_))) if self.topic.message_count == 0 => {
                return Ok(false)
            }
            Err(e) => return Err(e),
        };
        let mut shard = self
            .cursor
            .open_shard(self.storage.clone(), &self.topic)
            .await?;

        for record in parse_records(&self.topic.key, &data) {
            if self.shutdown.is_signalled() {
                return Ok(true);
            }

            let message = match record {
                ParsedRecord::Message(message) => message,
                ParsedRecord::Corrupt(e) => {
                    warn!("{}", e);
                    summary.failed += 1;
                    summary.failed_messages.push(match &e {
                        Error::Format { line, .. } => format!("line {}", line),
                        other => other.to_string(),
                    });
                    continue;
                }
            };

            if shard.is_replayed(&message.message_id) {
                summary.skipped += 1;
                continue;
            }
            self.publish(slot, &mut shard, message, summary).await?;
        }
        Ok(false)
    }

    /// Publish one message with retries and record the outcome in the cursor
    async fn publish(
        &self,
        slot: &PublisherSlot,
        shard: &mut CursorShard,
        message: CapturedMessage,
        summary: &mut TopicReplaySummary,
    ) -> Result<()> {
        let message_id = message.message_id;
        let outgoing = OutgoingMessage {
            content: message.content,
            properties: message.properties,
            partition_key: message.partition_key,
            event_timestamp: message.event_timestamp,
        };

        let attempted = self
            .retry
            .run(&format!("Publish {} to {}", message_id, self.topic.topic), || {
                let slot = slot.clone();
                let client = self.client.clone();
                let topic = self.topic.topic.clone();
                let outgoing = outgoing.clone();
                let message_id = message_id.clone();
                let publish_timeout = self.publish_timeout;
                async move {
                    publish_once(&slot, client.as_ref(), &topic, outgoing, publish_timeout)
                        .await
                        .map_err(|e| Error::Publish {
                            message_id,
                            message: e.to_string(),
                            retryable: e.is_retryable(),
                        })
                }
            })
            .await;

        match attempted.result {
            Ok(()) => {
                shard.mark_replayed(&message_id, attempted.attempts).await?;
                summary.replayed += 1;
            }
            Err(e) => {
                error!("{}", e);
                shard
                    .mark_failed(&message_id, attempted.attempts, &e.to_string())
                    .await?;
                summary.failed += 1;
                summary.failed_messages.push(message_id);
            }
        }
        Ok(())
    }
}

async fn publish_once(
    slot: &PublisherSlot,
    client: &dyn MessagingClient,
    topic: &str,
    message: OutgoingMessage,
    timeout: Duration,
) -> Result<()> {
    let mut guard = slot.lock().await;
    let mut publisher = match guard.take() {
        Some(publisher) => publisher,
        None => client.open_publisher(topic).await?,
    };

    let result = match tokio::time::timeout(timeout, publisher.publish(message)).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::Timeout(format!("publish to {}", topic)).into()),
    };
    if result.is_ok() {
        *guard = Some(publisher);
    }
    result
}
