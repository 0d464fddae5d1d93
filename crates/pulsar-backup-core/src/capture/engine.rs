//! Capture engine orchestration.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use super::stream::TopicStream;
use super::writer::{CaptureWriter, RecordSequencer, TopicStats};
use crate::cluster::{self, ClusterAdmin, MessagingClient};
use crate::config::{CaptureOptions, Config, Operation};
use crate::enumerate::InventoryEnumerator;
use crate::inventory::{normalize_topic, TopicName};
use crate::manifest::{
    load_inventory, manifest_key, save_inventory, CaptureManifest, TopicCapture, TopicStatus,
};
use crate::record::CapturedMessage;
use crate::report::{CaptureReport, TopicCaptureSummary};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::storage::{create_backend, StorageBackend};
use crate::{Error, Result};

const NOT_CAPTURED: &str = "not captured";
const CANCELLED: &str = "capture cancelled";

/// How a topic read ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicRun {
    Finished,
    Cancelled,
}

/// Capture engine: enumerates a cluster and writes a capture set
pub struct CaptureEngine {
    capture_id: String,
    source_url: Option<String>,
    options: CaptureOptions,
    admin: Arc<dyn ClusterAdmin>,
    client: Arc<dyn MessagingClient>,
    storage: Arc<dyn StorageBackend>,
    manifest: Arc<Mutex<CaptureManifest>>,
    retry: RetryPolicy,
    shutdown_tx: broadcast::Sender<()>,
}

impl CaptureEngine {
    /// Create a capture engine connected to the configured source
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate_for(Operation::Capture)?;
        let source = config.source()?;

        let admin = cluster::connect_admin(source)?;
        let client = cluster::connect_client(source).await?;
        let storage = create_backend(&config.storage)?;

        let mut engine = Self::with_components(
            config.capture_id_or_generate(),
            config.capture.clone(),
            admin,
            client,
            storage,
        );
        engine.source_url = Some(source.service_url.clone());
        engine.retry = config.replay.retry_policy();
        Ok(engine)
    }

    /// Create a capture engine over already-built components
    pub fn with_components(
        capture_id: impl Into<String>,
        options: CaptureOptions,
        admin: Arc<dyn ClusterAdmin>,
        client: Arc<dyn MessagingClient>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let capture_id = capture_id.into();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            manifest: Arc::new(Mutex::new(CaptureManifest::new(&capture_id))),
            capture_id,
            source_url: None,
            options,
            admin,
            client,
            storage,
            retry: RetryPolicy::default(),
            shutdown_tx,
        }
    }

    /// Override the retry policy used for the initial cluster calls
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn capture_id(&self) -> &str {
        &self.capture_id
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Capture inventory and messages into a new capture set
    pub async fn run(&self) -> Result<CaptureReport> {
        let started = Instant::now();

        if self.storage.exists(&manifest_key(&self.capture_id)).await? {
            return Err(Error::Config(format!(
                "Capture set {} already exists; use --retry-failed to re-capture its failed topics",
                self.capture_id
            )));
        }

        let enumerator = InventoryEnumerator::new(self.admin.clone(), self.options.clone())?;
        let enumeration = self
            .retry
            .retry("Inventory enumeration", || enumerator.enumerate())
            .await?;
        let inventory = enumeration.inventory;

        {
            let mut manifest = self.manifest.lock().await;
            *manifest = CaptureManifest::new(&self.capture_id);
            manifest.source = self.source_url.clone();
            manifest.inventory = inventory.counts();
            manifest.warnings = enumeration.warnings;
            for (topic, _) in inventory.topics() {
                let entry = manifest.get_or_create_topic(topic);
                entry.status = TopicStatus::Failed;
                entry.error = Some(NOT_CAPTURED.to_string());
            }
        }

        save_inventory(self.storage.as_ref(), &self.capture_id, &inventory).await?;
        self.save_manifest().await?;

        let topics: Vec<(String, u32)> = inventory
            .topics()
            .map(|(topic, partitions)| (topic.to_string(), partitions))
            .collect();
        info!(
            "Capturing {} topics into {} (max {} concurrent)",
            topics.len(),
            self.capture_id,
            self.options.max_concurrent_topics
        );

        let cancelled = self.capture_topics(topics).await?;
        self.finalize(started, cancelled).await
    }

    /// Re-capture the failed topics of an existing capture set
    pub async fn retry_failed(&self) -> Result<CaptureReport> {
        let started = Instant::now();

        let manifest = CaptureManifest::load(self.storage.as_ref(), &self.capture_id).await?;
        let inventory = load_inventory(self.storage.as_ref(), &self.capture_id).await?;

        self.retry
            .retry("Cluster check", || self.admin.list_clusters())
            .await?;

        let failed: Vec<(String, u32)> = manifest
            .failed_topics()
            .map(|t| {
                let partitions = inventory
                    .topics()
                    .find(|(name, _)| *name == t.topic)
                    .map_or(0, |(_, partitions)| partitions);
                (t.topic.clone(), partitions)
            })
            .collect();
        *self.manifest.lock().await = manifest;

        if failed.is_empty() {
            info!("Capture set {} has no failed topics", self.capture_id);
        } else {
            info!(
                "Re-capturing {} failed topics of {}",
                failed.len(),
                self.capture_id
            );
        }

        let cancelled = self.capture_topics(failed).await?;
        self.finalize(started, cancelled).await
    }

    /// Capture one topic and record the outcome in the in-memory manifest
    pub async fn capture_topic(&self, topic: &str) -> Result<TopicCapture> {
        let topic = normalize_topic(topic)?;
        let partitions = self.admin.partition_count(&topic).await?;
        let key = self
            .manifest
            .lock()
            .await
            .get_or_create_topic(&topic)
            .key
            .clone();

        let task = self.task(topic.clone(), partitions, key);
        let (stats, result) = task.capture().await;

        let mut manifest = self.manifest.lock().await;
        let entry = manifest.get_or_create_topic(&topic);
        record_outcome(entry, stats, &result);
        let captured = entry.clone();

        match result? {
            TopicRun::Finished => Ok(captured),
            TopicRun::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Read up to `limit` messages of a topic without storing them
    pub async fn peek_topic(&self, topic: &str, limit: usize) -> Result<Vec<CapturedMessage>> {
        let name = TopicName::parse(topic)?;
        let partitions = self.admin.partition_count(&name.to_string()).await?;
        let mut stream = TopicStream::new(
            self.client.clone(),
            &name,
            partitions,
            self.options.read_timeout(),
        );
        let mut sequencer = RecordSequencer::new(name.to_string());

        let mut messages = Vec::new();
        while messages.len() < limit {
            match stream.next().await {
                Ok(Some(received)) => messages.push(sequencer.next_record(received)),
                Ok(None) => break,
                Err(e) => {
                    return Err(Error::Capture {
                        topic: name.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(messages)
    }

    fn task(&self, topic: String, partitions: u32, key: String) -> TopicCaptureTask {
        TopicCaptureTask {
            topic,
            partitions,
            key,
            client: self.client.clone(),
            storage: self.storage.clone(),
            options: self.options.clone(),
            shutdown: Shutdown::new(self.shutdown_receiver()),
        }
    }

    /// Capture topics concurrently, saving the manifest after each one.
    /// Returns whether the run was cancelled.
    async fn capture_topics(&self, topics: Vec<(String, u32)>) -> Result<bool> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_topics));
        let mut shutdown = Shutdown::new(self.shutdown_receiver());
        let mut cancelled = false;
        let mut handles = Vec::new();

        for (topic, partitions) in topics {
            let key = self
                .manifest
                .lock()
                .await
                .get_or_create_topic(&topic)
                .key
                .clone();
            let task = self.task(topic, partitions, key);

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

            let manifest = self.manifest.clone();
            let storage = self.storage.clone();
            handles.push(tokio::spawn(async move {
                let topic = task.topic.clone();
                let (stats, outcome) = task.capture().await;
                drop(permit);

                let mut manifest = manifest.lock().await;
                record_outcome(manifest.get_or_create_topic(&topic), stats, &outcome);
                // Saved under the lock so an older snapshot never overwrites a newer one
                manifest.save(storage.as_ref()).await?;
                Ok::<_, Error>(matches!(outcome, Ok(TopicRun::Cancelled)))
            }));
        }

        debug!("Spawned {} capture tasks", handles.len());

        let mut first_error = None;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(Ok(topic_cancelled)) => cancelled |= topic_cancelled,
                Ok(Err(e)) => {
                    error!("Failed to save manifest: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => error!("Capture task join error: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(cancelled),
        }
    }

    async fn finalize(&self, started: Instant, cancelled: bool) -> Result<CaptureReport> {
        {
            let mut manifest = self.manifest.lock().await;
            if cancelled {
                warn!(
                    "Capture {} cancelled; run with --retry-failed to finish it",
                    self.capture_id
                );
            } else {
                manifest.complete();
            }
        }
        self.save_manifest().await?;

        let manifest = self.manifest.lock().await;
        let report = CaptureReport {
            capture_id: self.capture_id.clone(),
            inventory: manifest.inventory,
            warnings: manifest.warnings.clone(),
            topics: manifest
                .topics
                .iter()
                .map(|t| TopicCaptureSummary {
                    topic: t.topic.clone(),
                    status: t.status,
                    messages: t.message_count,
                    error: t.error.clone(),
                })
                .collect(),
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Capture {} finished: {} messages from {} topics ({} failed)",
            self.capture_id,
            report.total_messages(),
            report.topics.len(),
            report.failed_topics().count()
        );
        Ok(report)
    }

    async fn save_manifest(&self) -> Result<()> {
        let manifest = self.manifest.lock().await;
        manifest.save(self.storage.as_ref()).await?;
        debug!("Saved manifest for {}", self.capture_id);
        Ok(())
    }
}

fn record_outcome(entry: &mut TopicCapture, stats: TopicStats, outcome: &Result<TopicRun>) {
    entry.message_count = stats.message_count;
    entry.first_timestamp = stats.first_timestamp;
    entry.last_timestamp = stats.last_timestamp;
    match outcome {
        Ok(TopicRun::Finished) => {
            entry.status = TopicStatus::Completed;
            entry.error = None;
        }
        Ok(TopicRun::Cancelled) => {
            entry.status = TopicStatus::Failed;
            entry.error = Some(CANCELLED.to_string());
        }
        Err(e) => {
            entry.status = TopicStatus::Failed;
            entry.error = Some(e.to_string());
        }
    }
}

/// Context for capturing a single topic
struct TopicCaptureTask {
    topic: String,
    partitions: u32,
    key: String,
    client: Arc<dyn MessagingClient>,
    storage: Arc<dyn StorageBackend>,
    options: CaptureOptions,
    shutdown: Shutdown,
}

impl TopicCaptureTask {
    /// Read the topic into its record file. Stats cover what was written
    /// even when the read failed part way.
    async fn capture(mut self) -> (TopicStats, Result<TopicRun>) {
        let mut writer = match CaptureWriter::create(self.storage.clone(), &self.key, &self.topic)
            .await
        {
            Ok(writer) => writer,
            Err(e) => return (TopicStats::default(), Err(e)),
        };

        let result = self.read_into(&mut writer).await;
        let stats = writer.stats();
        match &result {
            Ok(TopicRun::Finished) => info!(
                "Captured {} messages from {}",
                stats.message_count, self.topic
            ),
            Ok(TopicRun::Cancelled) => warn!(
                "Capture of {} cancelled after {} messages",
                self.topic, stats.message_count
            ),
            Err(e) => error!("{}", e),
        }
        (stats, result)
    }

    async fn read_into(&mut self, writer: &mut CaptureWriter) -> Result<TopicRun> {
        let name = TopicName::parse(&self.topic)?;
        let mut stream = TopicStream::new(
            self.client.clone(),
            &name,
            self.partitions,
            self.options.read_timeout(),
        );

        loop {
            if writer.stats().message_count >= self.options.max_messages_per_topic {
                warn!(
                    "{} reached max_messages_per_topic ({}), stopping",
                    self.topic, self.options.max_messages_per_topic
                );
                return Ok(TopicRun::Finished);
            }
            if self.shutdown.is_signalled() {
                return Ok(TopicRun::Cancelled);
            }

            let received = match stream.next().await {
                Ok(Some(received)) => received,
                Ok(None) => return Ok(TopicRun::Finished),
                Err(e) => {
                    return Err(Error::Capture {
                        topic: self.topic.clone(),
                        message: e.to_string(),
                    })
                }
            };
            writer.write(received).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, OutgoingMessage};
    use crate::record::{parse_records, ParsedRecord};
    use crate::storage::MemoryBackend;
    use std::time::Duration;

    fn engine(cluster: &InMemoryCluster, storage: Arc<dyn StorageBackend>) -> CaptureEngine {
        CaptureEngine::with_components(
            "c1",
            CaptureOptions {
                read_timeout_ms: 10,
                ..Default::default()
            },
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            storage,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        })
    }

    fn publish(cluster: &InMemoryCluster, topic: &str, content: &str) {
        cluster
            .add_message(
                topic,
                OutgoingMessage {
                    content: content.as_bytes().to_vec(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    async fn captured_contents(storage: &dyn StorageBackend, key: &str) -> Vec<String> {
        let data = storage.get(key).await.unwrap();
        parse_records(key, &data)
            .into_iter()
            .map(|r| match r {
                ParsedRecord::Message(m) => String::from_utf8(m.content).unwrap(),
                ParsedRecord::Corrupt(e) => panic!("corrupt record: {}", e),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_partitioned_topic_into_one_file() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/orders", 2);
        for i in 0..4 {
            publish(&cluster, "t1/ns1/orders", &format!("m{}", i));
        }

        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let engine = engine(&cluster, storage.clone());
        let captured = engine.capture_topic("t1/ns1/orders").await.unwrap();

        assert_eq!(captured.status, TopicStatus::Completed);
        assert_eq!(captured.message_count, 4);
        let contents = captured_contents(storage.as_ref(), &captured.key).await;
        let expected: Vec<String> = cluster
            .messages("t1/ns1/orders")
            .into_iter()
            .map(|m| String::from_utf8(m.content).unwrap())
            .collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_max_messages_per_topic() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/a", 0);
        for i in 0..10 {
            publish(&cluster, "t1/ns1/a", &format!("m{}", i));
        }

        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mut engine = engine(&cluster, storage);
        engine.options.max_messages_per_topic = 3;

        let captured = engine.capture_topic("t1/ns1/a").await.unwrap();
        assert_eq!(captured.message_count, 3);
    }

    #[tokio::test]
    async fn test_existing_capture_set_is_not_overwritten() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/a", 0);
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());

        engine(&cluster, storage.clone()).run().await.unwrap();
        let err = engine(&cluster, storage).run().await.unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("--retry-failed")));
    }

    #[test]
    fn test_cancelled_topic_is_recorded_failed() {
        let mut entry = TopicCapture::new("persistent://t1/ns1/a", "c1/messages/00000-a.jsonl");
        let stats = TopicStats {
            message_count: 2,
            first_timestamp: Some(1),
            last_timestamp: Some(2),
        };

        record_outcome(&mut entry, stats, &Ok(TopicRun::Cancelled));
        assert_eq!(entry.status, TopicStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some(CANCELLED));
        assert_eq!(entry.message_count, 2);

        record_outcome(&mut entry, stats, &Ok(TopicRun::Finished));
        assert_eq!(entry.status, TopicStatus::Completed);
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_write() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/a", 0);
        for i in 0..5 {
            publish(&cluster, "t1/ns1/a", &format!("m{}", i));
        }

        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let engine = engine(&cluster, storage.clone());
        let messages = engine.peek_topic("t1/ns1/a", 2).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, b"m1");
        assert!(storage.list("").await.unwrap().is_empty());
    }
}
