//! In-process cluster for testing.
//!
//! Implements both [`ClusterAdmin`] and [`MessagingClient`] over shared state
//! and exposes fault injection hooks for the failure paths engines must
//! survive.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::{
    ClusterAdmin, CreateOutcome, MessagingClient, OutgoingMessage, ReceivedMessage,
    TopicPublisher, TopicReader,
};
use crate::error::ClusterError;
use crate::inventory::TopicName;
use crate::Result;

const ENDPOINT: &str = "memory://cluster";

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    /// Reader fails once this many messages were delivered
    failing_reads: HashMap<String, usize>,
    /// Remaining failed publish attempts per topic
    failing_publishes: HashMap<String, u32>,
    /// Successful publishes left before every publish fails
    publish_budget: Option<usize>,
    /// Listed as tenants but gone when their namespaces are listed
    vanished_tenants: HashSet<String>,
    omit_message_ids: bool,
}

#[derive(Debug)]
struct Stream {
    ledger: u64,
    partition: i32,
    messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Default)]
struct State {
    clusters: Vec<String>,
    tenants: BTreeMap<String, Vec<String>>,
    namespaces: BTreeSet<String>,
    /// Topic name to partition count (0 = non-partitioned)
    topics: BTreeMap<String, u32>,
    /// Concrete topic (plain topic or partition member) to its messages
    streams: HashMap<String, Stream>,
    next_ledger: u64,
    round_robin: usize,
    publish_attempts: usize,
    faults: Faults,
}

impl State {
    fn check_reachable(&self) -> std::result::Result<(), ClusterError> {
        if self.faults.unreachable {
            Err(ClusterError::Unreachable {
                endpoint: ENDPOINT.to_string(),
                message: "connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn stream(&mut self, topic: &str, partition: i32) -> &mut Stream {
        let ledger = &mut self.next_ledger;
        self.streams.entry(topic.to_string()).or_insert_with(|| {
            *ledger += 1;
            Stream {
                ledger: *ledger,
                partition,
                messages: Vec::new(),
            }
        })
    }

    fn ensure_topic(&mut self, name: &TopicName, partitions: u32) {
        let full = name.to_string();
        self.tenants.entry(name.tenant.clone()).or_default();
        self.namespaces.insert(name.namespace_path());
        self.topics.entry(full.clone()).or_insert(partitions);
        if partitions == 0 {
            self.stream(&full, -1);
        } else {
            for i in 0..partitions {
                self.stream(&name.partition(i).to_string(), i as i32);
            }
        }
    }

    /// Append a message, routing a partitioned topic by key or round robin
    fn append(&mut self, topic: &str, message: OutgoingMessage) -> Result<()> {
        let name = TopicName::parse(topic)?;
        let full = name.to_string();
        if !self.topics.contains_key(&full) {
            if !self.namespaces.contains(&name.namespace_path()) {
                return Err(ClusterError::NotFound(name.namespace_path()).into());
            }
            // Brokers auto-create topics on first publish
            self.ensure_topic(&name, 0);
        }

        let partitions = self.topics.get(&full).copied().unwrap_or(0);
        let target = if partitions == 0 {
            full
        } else {
            let slot = match &message.partition_key {
                Some(key) => key.bytes().map(usize::from).sum::<usize>(),
                None => {
                    self.round_robin += 1;
                    self.round_robin
                }
            } % partitions as usize;
            name.partition(slot as u32).to_string()
        };

        let publish_timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let stream = self.stream(&target, -1);
        let message_id = format!(
            "{}:{}:{}:-1",
            stream.ledger,
            stream.messages.len(),
            stream.partition
        );
        stream.messages.push(ReceivedMessage {
            message_id: Some(message_id),
            content: message.content,
            properties: message.properties,
            publish_timestamp,
            event_timestamp: message.event_timestamp.filter(|ts| *ts != 0),
            partition_key: message.partition_key,
        });
        Ok(())
    }
}

/// Shared in-memory cluster; clones observe the same state
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Empty cluster named `standalone`
    pub fn new() -> Self {
        let state = State {
            clusters: vec!["standalone".to_string()],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Cluster with the system resources a fresh standalone broker has
    pub fn standalone() -> Self {
        let cluster = Self::new();
        cluster.add_namespace("public/default");
        cluster.add_namespace("public/functions");
        cluster.add_namespace("pulsar/system");
        cluster.add_topic("persistent://public/default/__change_events", 0);
        cluster
    }

    pub fn add_tenant(&self, name: &str) {
        self.state.lock().tenants.entry(name.to_string()).or_default();
    }

    /// Add a namespace, creating its tenant
    pub fn add_namespace(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some((tenant, _)) = name.split_once('/') {
            state.tenants.entry(tenant.to_string()).or_default();
        }
        state.namespaces.insert(name.to_string());
    }

    /// Add a topic, creating its tenant and namespace
    pub fn add_topic(&self, name: &str, partitions: u32) {
        if let Ok(parsed) = TopicName::parse(name) {
            self.state.lock().ensure_topic(&parsed, partitions);
        }
    }

    /// Publish a message directly, bypassing faults
    pub fn add_message(&self, topic: &str, message: OutgoingMessage) -> Result<()> {
        self.state.lock().append(topic, message)
    }

    /// Messages stored for a topic; a partitioned topic yields its partitions in order
    pub fn messages(&self, topic: &str) -> Vec<ReceivedMessage> {
        let state = self.state.lock();
        let Ok(name) = TopicName::parse(topic) else {
            return Vec::new();
        };
        let full = name.to_string();
        match state.topics.get(&full).copied().unwrap_or(0) {
            0 => state
                .streams
                .get(&full)
                .map(|s| s.messages.clone())
                .unwrap_or_default(),
            n => (0..n)
                .filter_map(|i| state.streams.get(&name.partition(i).to_string()))
                .flat_map(|s| s.messages.clone())
                .collect(),
        }
    }

    pub fn has_tenant(&self, name: &str) -> bool {
        self.state.lock().tenants.contains_key(name)
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().namespaces.contains(name)
    }

    /// Partition count of an existing topic
    pub fn topic_partitions(&self, name: &str) -> Option<u32> {
        let full = TopicName::parse(name).ok()?.to_string();
        self.state.lock().topics.get(&full).copied()
    }

    /// Allowed clusters a tenant was created with
    pub fn tenant_clusters(&self, name: &str) -> Option<Vec<String>> {
        self.state.lock().tenants.get(name).cloned()
    }

    /// Publish calls received, including failed ones
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().publish_attempts
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().faults.unreachable = unreachable;
    }

    /// Make readers of `topic` fail after delivering `after` messages
    pub fn fail_reads(&self, topic: &str, after: usize) {
        self.state
            .lock()
            .faults
            .failing_reads
            .insert(topic.to_string(), after);
    }

    pub fn clear_read_failures(&self) {
        self.state.lock().faults.failing_reads.clear();
    }

    /// Fail the next `times` publish attempts to `topic`
    pub fn fail_publishes(&self, topic: &str, times: u32) {
        self.state
            .lock()
            .faults
            .failing_publishes
            .insert(topic.to_string(), times);
    }

    /// Allow `budget` more successful publishes, then fail every publish
    pub fn limit_publishes(&self, budget: Option<usize>) {
        self.state.lock().faults.publish_budget = budget;
    }

    /// Keep listing `tenant` but report it missing when its namespaces are listed
    pub fn vanish_tenant(&self, tenant: &str) {
        self.state
            .lock()
            .faults
            .vanished_tenants
            .insert(tenant.to_string());
    }

    /// Deliver messages without broker ids
    pub fn omit_message_ids(&self, omit: bool) {
        self.state.lock().faults.omit_message_ids = omit;
    }
}

#[async_trait]
impl ClusterAdmin for InMemoryCluster {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_reachable()?;
        Ok(state.clusters.clone())
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_reachable()?;
        Ok(state.tenants.keys().cloned().collect())
    }

    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_reachable()?;
        if !state.tenants.contains_key(tenant) || state.faults.vanished_tenants.contains(tenant) {
            return Err(ClusterError::NotFound(tenant.to_string()).into());
        }
        let prefix = format!("{}/", tenant);
        Ok(state
            .namespaces
            .iter()
            .filter(|ns| ns.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_reachable()?;
        if !state.namespaces.contains(namespace) {
            return Err(ClusterError::NotFound(namespace.to_string()).into());
        }
        let mut topics = Vec::new();
        for (name, partitions) in &state.topics {
            let parsed = TopicName::parse(name)?;
            if parsed.namespace_path() != namespace {
                continue;
            }
            if *partitions == 0 {
                topics.push(name.clone());
            } else {
                topics.extend((0..*partitions).map(|i| parsed.partition(i).to_string()));
            }
        }
        Ok(topics)
    }

    async fn list_partitioned_topics(&self, namespace: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_reachable()?;
        if !state.namespaces.contains(namespace) {
            return Err(ClusterError::NotFound(namespace.to_string()).into());
        }
        let mut topics = Vec::new();
        for (name, partitions) in &state.topics {
            if *partitions > 0 && TopicName::parse(name)?.namespace_path() == namespace {
                topics.push(name.clone());
            }
        }
        Ok(topics)
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        let state = self.state.lock();
        state.check_reachable()?;
        let full = TopicName::parse(topic)?.to_string();
        Ok(state.topics.get(&full).copied().unwrap_or(0))
    }

    async fn create_tenant(
        &self,
        name: &str,
        allowed_clusters: &[String],
    ) -> Result<CreateOutcome> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        if state.tenants.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if let Some(unknown) = allowed_clusters
            .iter()
            .find(|c| !state.clusters.contains(c))
        {
            return Err(ClusterError::Rejected {
                status: 412,
                message: format!("Cluster {} does not exist", unknown),
            }
            .into());
        }
        state
            .tenants
            .insert(name.to_string(), allowed_clusters.to_vec());
        Ok(CreateOutcome::Created)
    }

    async fn create_namespace(&self, name: &str) -> Result<CreateOutcome> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        let tenant = name.split('/').next().unwrap_or_default();
        if !state.tenants.contains_key(tenant) {
            return Err(ClusterError::NotFound(tenant.to_string()).into());
        }
        if !state.namespaces.insert(name.to_string()) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Ok(CreateOutcome::Created)
    }

    async fn create_topic(&self, name: &str, partitions: u32) -> Result<CreateOutcome> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        let parsed = TopicName::parse(name)?;
        if !state.namespaces.contains(&parsed.namespace_path()) {
            return Err(ClusterError::NotFound(parsed.namespace_path()).into());
        }
        if state.topics.contains_key(&parsed.to_string()) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.ensure_topic(&parsed, partitions);
        Ok(CreateOutcome::Created)
    }

    async fn delete_topic(&self, name: &str, _partitions: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        let parsed = TopicName::parse(name)?;
        let full = parsed.to_string();
        let partitions = state
            .topics
            .remove(&full)
            .ok_or_else(|| ClusterError::NotFound(full.clone()))?;
        state.streams.remove(&full);
        for i in 0..partitions {
            state.streams.remove(&parsed.partition(i).to_string());
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        if !state.namespaces.contains(name) {
            return Err(ClusterError::NotFound(name.to_string()).into());
        }
        let has_topics = state.topics.keys().any(|t| {
            TopicName::parse(t)
                .map(|p| p.namespace_path() == name)
                .unwrap_or(false)
        });
        if has_topics {
            return Err(ClusterError::Rejected {
                status: 409,
                message: format!("Namespace {} is not empty", name),
            }
            .into());
        }
        state.namespaces.remove(name);
        Ok(())
    }

    async fn delete_tenant(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_reachable()?;
        if !state.tenants.contains_key(name) {
            return Err(ClusterError::NotFound(name.to_string()).into());
        }
        let prefix = format!("{}/", name);
        if state.namespaces.iter().any(|ns| ns.starts_with(&prefix)) {
            return Err(ClusterError::Rejected {
                status: 409,
                message: format!("Tenant {} still has namespaces", name),
            }
            .into());
        }
        state.tenants.remove(name);
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for InMemoryCluster {
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn TopicReader>> {
        let state = self.state.lock();
        state.check_reachable()?;
        let full = TopicName::parse(topic)?.to_string();
        if !state.streams.contains_key(&full) {
            return Err(ClusterError::NotFound(full).into());
        }
        let fail_after = state
            .faults
            .failing_reads
            .iter()
            .find(|(t, _)| full == **t || full.starts_with(&format!("{}-partition-", t)))
            .map(|(_, after)| *after);
        if fail_after == Some(0) {
            return Err(ClusterError::Client(format!("Failed to subscribe to {}", full)).into());
        }

        Ok(Box::new(MemoryReader {
            state: self.state.clone(),
            topic: full,
            position: 0,
            fail_after,
        }))
    }

    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn TopicPublisher>> {
        let state = self.state.lock();
        state.check_reachable()?;
        Ok(Box::new(MemoryPublisher {
            state: self.state.clone(),
            topic: TopicName::parse(topic)?.to_string(),
        }))
    }
}

struct MemoryReader {
    state: Arc<Mutex<State>>,
    topic: String,
    position: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl TopicReader for MemoryReader {
    async fn next_message(&mut self, _timeout: Duration) -> Result<Option<ReceivedMessage>> {
        if self.fail_after.is_some_and(|after| self.position >= after) {
            return Err(ClusterError::Client(format!("Reader on {} disconnected", self.topic)).into());
        }

        let state = self.state.lock();
        let Some(stream) = state.streams.get(&self.topic) else {
            return Err(ClusterError::NotFound(self.topic.clone()).into());
        };
        // Nothing pending behaves as an elapsed read timeout
        let Some(message) = stream.messages.get(self.position) else {
            return Ok(None);
        };

        let mut message = message.clone();
        if state.faults.omit_message_ids {
            message.message_id = None;
        }
        self.position += 1;
        Ok(Some(message))
    }
}

struct MemoryPublisher {
    state: Arc<Mutex<State>>,
    topic: String,
}

#[async_trait]
impl TopicPublisher for MemoryPublisher {
    async fn publish(&mut self, message: OutgoingMessage) -> Result<()> {
        let mut state = self.state.lock();
        state.publish_attempts += 1;
        state.check_reachable()?;

        if let Some(remaining) = state.faults.failing_publishes.get_mut(&self.topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Timeout(format!("publish to {}", self.topic)).into());
            }
        }
        let budget = state.faults.publish_budget;
        match budget {
            Some(0) => {
                return Err(ClusterError::Unreachable {
                    endpoint: ENDPOINT.to_string(),
                    message: "broker went away".to_string(),
                }
                .into())
            }
            Some(n) => state.faults.publish_budget = Some(n - 1),
            None => {}
        }

        state.append(&self.topic, message)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> OutgoingMessage {
        OutgoingMessage {
            content: content.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_partitioned_listing() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/orders", 2);
        cluster.add_topic("t1/ns1/audit", 0);

        let topics = cluster.list_topics("t1/ns1").await.unwrap();
        assert_eq!(
            topics,
            vec![
                "persistent://t1/ns1/audit",
                "persistent://t1/ns1/orders-partition-0",
                "persistent://t1/ns1/orders-partition-1",
            ]
        );
        assert_eq!(
            cluster.list_partitioned_topics("t1/ns1").await.unwrap(),
            vec!["persistent://t1/ns1/orders"]
        );
        assert_eq!(cluster.partition_count("t1/ns1/orders").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reader_sees_messages_in_order() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/a", 0);
        for n in ["one", "two"] {
            cluster.add_message("t1/ns1/a", text(n)).unwrap();
        }

        let mut reader = cluster.open_reader("t1/ns1/a").await.unwrap();
        let timeout = Duration::from_millis(10);
        let first = reader.next_message(timeout).await.unwrap().unwrap();
        let second = reader.next_message(timeout).await.unwrap().unwrap();
        assert_eq!(first.content, b"one");
        assert_eq!(second.content, b"two");
        assert_ne!(first.message_id, second.message_id);
        assert!(reader.next_message(timeout).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_checks_parent() {
        let cluster = InMemoryCluster::new();
        let clusters = vec!["standalone".to_string()];

        assert_eq!(
            cluster.create_tenant("t1", &clusters).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            cluster.create_tenant("t1", &clusters).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert!(cluster
            .create_namespace("t2/ns1")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(cluster
            .create_tenant("t3", &["elsewhere".to_string()])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_publish_faults() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/a", 0);
        cluster.fail_publishes("persistent://t1/ns1/a", 1);

        let mut publisher = cluster.open_publisher("t1/ns1/a").await.unwrap();
        assert!(publisher.publish(text("x")).await.is_err());
        publisher.publish(text("x")).await.unwrap();
        assert_eq!(cluster.messages("t1/ns1/a").len(), 1);
        assert_eq!(cluster.publish_attempts(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let cluster = InMemoryCluster::standalone();
        cluster.set_unreachable(true);
        let err = cluster.list_tenants().await.unwrap_err();
        assert!(matches!(err, crate::Error::Connectivity(_)));
    }
}
