//! Capture scenario tests.
//!
//! Covers:
//! - Inventory enumeration against a standalone cluster
//! - Branches that disappear mid-enumeration
//! - Per-topic failure isolation and `retry_failed`

use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::record::{parse_records, ParsedRecord};
use pulsar_backup_core::storage::StorageBackend;
use pulsar_backup_core::{CaptureManifest, CaptureState, InMemoryCluster, TopicStatus};

use super::helpers::{capture, capture_engine, new_storage, publish_all, CAPTURE_ID};

async fn record_contents(storage: &dyn StorageBackend, key: &str) -> Vec<String> {
    let data = storage.get(key).await.unwrap();
    parse_records(key, &data)
        .into_iter()
        .map(|r| match r {
            ParsedRecord::Message(m) => String::from_utf8(m.content).unwrap(),
            ParsedRecord::Corrupt(e) => panic!("corrupt record: {}", e),
        })
        .collect()
}

// ============================================================================
// Enumeration
// ============================================================================

#[tokio::test]
async fn capture_skips_system_resources() {
    let source = InMemoryCluster::standalone();
    source.add_topic("t1/ns1/a", 0);
    source.add_topic("t1/ns1/orders", 3);
    publish_all(&source, "t1/ns1/a", &["one", "two"]);

    let storage = new_storage();
    let report = capture(&source, storage.clone()).await;

    assert!(!report.has_failures(), "{}", report);
    assert_eq!(report.inventory.tenants, 1);
    assert_eq!(report.inventory.namespaces, 1);
    assert_eq!(report.inventory.topics, 2);
    assert_eq!(report.total_messages(), 2);

    let inventory = load_inventory(storage.as_ref(), CAPTURE_ID).await.unwrap();
    let topics: Vec<(&str, u32)> = inventory.topics().collect();
    assert_eq!(
        topics,
        vec![
            ("persistent://t1/ns1/a", 0),
            ("persistent://t1/ns1/orders", 3)
        ]
    );
}

#[tokio::test]
async fn vanished_tenant_is_a_warning() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/a", 0);
    source.add_topic("t2/ns1/b", 0);
    publish_all(&source, "t1/ns1/a", &["one"]);
    source.vanish_tenant("t2");

    let storage = new_storage();
    let report = capture(&source, storage.clone()).await;

    assert!(!report.has_failures(), "{}", report);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("t2"));
    assert_eq!(report.inventory.tenants, 1);
    assert_eq!(report.topics.len(), 1);

    let manifest = CaptureManifest::load(storage.as_ref(), CAPTURE_ID).await.unwrap();
    assert_eq!(manifest.warnings, report.warnings);
    assert!(manifest.is_completed());
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn read_failure_is_isolated_and_retried() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/a", 0);
    source.add_topic("t1/ns1/b", 0);
    source.add_topic("t1/ns1/c", 0);
    publish_all(&source, "t1/ns1/a", &["a0", "a1", "a2"]);
    publish_all(&source, "t1/ns1/b", &["b0", "b1", "b2"]);
    publish_all(&source, "t1/ns1/c", &["c0"]);
    source.fail_reads("persistent://t1/ns1/b", 1);

    let storage = new_storage();
    let report = capture(&source, storage.clone()).await;

    assert!(report.has_failures());
    let failed: Vec<&str> = report.failed_topics().map(|t| t.topic.as_str()).collect();
    assert_eq!(failed, vec!["persistent://t1/ns1/b"]);

    let manifest = CaptureManifest::load(storage.as_ref(), CAPTURE_ID).await.unwrap();
    let a = manifest
        .topics
        .iter()
        .find(|t| t.topic == "persistent://t1/ns1/a")
        .unwrap();
    assert_eq!(a.status, TopicStatus::Completed);
    assert_eq!(record_contents(storage.as_ref(), &a.key).await, vec!["a0", "a1", "a2"]);
    let c = manifest
        .topics
        .iter()
        .find(|t| t.topic == "persistent://t1/ns1/c")
        .unwrap();
    assert_eq!(c.status, TopicStatus::Completed);
    assert_eq!(c.message_count, 1);

    source.clear_read_failures();
    let retried = capture_engine(&source, storage.clone())
        .retry_failed()
        .await
        .unwrap();
    assert!(!retried.has_failures(), "{}", retried);

    let manifest = CaptureManifest::load(storage.as_ref(), CAPTURE_ID).await.unwrap();
    assert_eq!(manifest.state, CaptureState::Completed);
    assert_eq!(manifest.total_messages(), 7);
    let b = manifest
        .topics
        .iter()
        .find(|t| t.topic == "persistent://t1/ns1/b")
        .unwrap();
    assert_eq!(b.status, TopicStatus::Completed);
    // The partial file from the failed attempt is replaced, not appended to
    assert_eq!(record_contents(storage.as_ref(), &b.key).await, vec!["b0", "b1", "b2"]);
}

#[tokio::test]
async fn unreachable_source_is_fatal() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/a", 0);
    source.set_unreachable(true);

    let storage = new_storage();
    let result = capture_engine(&source, storage.clone()).run().await;

    assert!(result.is_err());
    assert!(!storage
        .exists(&pulsar_backup_core::manifest::manifest_key(CAPTURE_ID))
        .await
        .unwrap());
}
