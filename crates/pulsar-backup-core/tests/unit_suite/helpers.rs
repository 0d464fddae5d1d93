//! Test helper utilities.
//!
//! Builds engines wired to in-memory clusters and storage with short
//! timeouts and backoffs.

use pulsar_backup_core::config::CaptureOptions;
use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::storage::{MemoryBackend, StorageBackend};
use pulsar_backup_core::{
    CaptureEngine, CaptureReport, InMemoryCluster, InventoryRestoreReport, InventoryRestorer,
    OutgoingMessage, ReplayEngine, ReplayOptions, ReplayReport, RestoreOptions, RetryPolicy,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const CAPTURE_ID: &str = "capture-1";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub fn capture_options() -> CaptureOptions {
    CaptureOptions {
        read_timeout_ms: 10,
        ..Default::default()
    }
}

pub fn replay_options() -> ReplayOptions {
    ReplayOptions {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        publish_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub fn new_storage() -> Arc<dyn StorageBackend> {
    Arc::new(MemoryBackend::new())
}

pub fn text(content: &str) -> OutgoingMessage {
    OutgoingMessage {
        content: content.as_bytes().to_vec(),
        ..Default::default()
    }
}

pub fn publish_all(cluster: &InMemoryCluster, topic: &str, contents: &[&str]) {
    for content in contents {
        cluster.add_message(topic, text(content)).unwrap();
    }
}

/// Message contents stored on `cluster` for `topic`, in read order
pub fn contents(cluster: &InMemoryCluster, topic: &str) -> Vec<String> {
    cluster
        .messages(topic)
        .into_iter()
        .map(|m| String::from_utf8(m.content).unwrap())
        .collect()
}

pub fn properties(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn capture_engine(source: &InMemoryCluster, storage: Arc<dyn StorageBackend>) -> CaptureEngine {
    CaptureEngine::with_components(
        CAPTURE_ID,
        capture_options(),
        Arc::new(source.clone()),
        Arc::new(source.clone()),
        storage,
    )
    .with_retry_policy(fast_retry())
}

pub async fn capture(source: &InMemoryCluster, storage: Arc<dyn StorageBackend>) -> CaptureReport {
    capture_engine(source, storage).run().await.unwrap()
}

pub async fn restore_inventory(
    target: &InMemoryCluster,
    storage: &dyn StorageBackend,
) -> InventoryRestoreReport {
    let inventory = load_inventory(storage, CAPTURE_ID).await.unwrap();
    InventoryRestorer::new(Arc::new(target.clone()), &RestoreOptions::default())
        .with_retry_policy(fast_retry())
        .restore_inventory(&inventory)
        .await
        .unwrap()
}

pub fn replay_engine(target: &InMemoryCluster, storage: Arc<dyn StorageBackend>) -> ReplayEngine {
    ReplayEngine::with_components(CAPTURE_ID, replay_options(), Arc::new(target.clone()), storage)
}

pub async fn replay(target: &InMemoryCluster, storage: Arc<dyn StorageBackend>) -> ReplayReport {
    replay_engine(target, storage).replay_messages().await.unwrap()
}
