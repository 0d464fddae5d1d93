//! Cluster interfaces: admin operations and message transport.
//!
//! Engines only see the [`ClusterAdmin`] and [`MessagingClient`] traits.
//! Implementations:
//!
//! - [`RestAdmin`]: Pulsar admin REST API (`admin/v2`)
//! - [`PulsarctlAdmin`]: `pulsarctl` subprocess
//! - [`PulsarMessagingClient`]: binary protocol via the `pulsar` crate
//! - [`InMemoryCluster`]: both traits, in process, with fault injection

mod memory;
mod oauth;
mod pulsar_client;
mod pulsarctl;
mod rest;

pub use memory::InMemoryCluster;
pub use pulsar_client::PulsarMessagingClient;
pub use pulsarctl::{parse_table, PulsarctlAdmin};
pub use rest::RestAdmin;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdminTransport, ClusterConfig};
use crate::Result;

/// Outcome of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Admin operations on a cluster
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Cluster names known to the target
    async fn list_clusters(&self) -> Result<Vec<String>>;

    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// Namespaces of a tenant, as `tenant/namespace`
    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>>;

    /// Fully-qualified topics of a namespace, including partition members
    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>>;

    /// Fully-qualified partitioned topics of a namespace
    async fn list_partitioned_topics(&self, namespace: &str) -> Result<Vec<String>>;

    /// Partition count of a topic; 0 when not partitioned
    async fn partition_count(&self, topic: &str) -> Result<u32>;

    async fn create_tenant(&self, name: &str, allowed_clusters: &[String])
        -> Result<CreateOutcome>;

    async fn create_namespace(&self, name: &str) -> Result<CreateOutcome>;

    /// Create a topic; `partitions == 0` creates a non-partitioned topic
    async fn create_topic(&self, name: &str, partitions: u32) -> Result<CreateOutcome>;

    /// Delete a topic, including all partitions of a partitioned topic
    async fn delete_topic(&self, name: &str, partitions: u32) -> Result<()>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn delete_tenant(&self, name: &str) -> Result<()>;
}

/// A message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// `ledger:entry:partition:batch`, absent when the transport has none
    pub message_id: Option<String>,
    pub content: Vec<u8>,
    pub properties: BTreeMap<String, String>,
    pub publish_timestamp: u64,
    /// Zero is normalized to `None`
    pub event_timestamp: Option<u64>,
    pub partition_key: Option<String>,
}

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub content: Vec<u8>,
    pub properties: BTreeMap<String, String>,
    pub partition_key: Option<String>,
    pub event_timestamp: Option<u64>,
}

/// Non-acknowledging reader positioned at the earliest message
#[async_trait]
pub trait TopicReader: Send {
    /// Next message, or `None` once nothing arrives within `timeout`
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>>;
}

/// Producer bound to one topic
#[async_trait]
pub trait TopicPublisher: Send {
    /// Publish and wait for the broker receipt
    async fn publish(&mut self, message: OutgoingMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Message transport
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn TopicReader>>;

    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn TopicPublisher>>;
}

/// Build the admin implementation selected by the cluster config
pub fn connect_admin(config: &ClusterConfig) -> Result<Arc<dyn ClusterAdmin>> {
    match &config.admin {
        AdminTransport::Rest => Ok(Arc::new(RestAdmin::new(config)?)),
        AdminTransport::Pulsarctl {
            program,
            prefix_args,
        } => Ok(Arc::new(PulsarctlAdmin::new(
            program.clone(),
            prefix_args.clone(),
            config.operation_timeout(),
        ))),
    }
}

/// Connect the broker client
pub async fn connect_client(config: &ClusterConfig) -> Result<Arc<dyn MessagingClient>> {
    Ok(Arc::new(PulsarMessagingClient::connect(config).await?))
}
