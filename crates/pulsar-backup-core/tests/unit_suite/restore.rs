//! Restore scenario tests.
//!
//! Covers:
//! - Full capture, inventory restore and replay into an empty cluster
//! - Idempotent re-runs
//! - Byte-exact message content and metadata
//! - Partition count conflicts

use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::record::{parse_records, ParsedRecord};
use pulsar_backup_core::storage::StorageBackend;
use pulsar_backup_core::{CaptureManifest, CapturedMessage, InMemoryCluster, OutgoingMessage};

use super::helpers::{
    capture, contents, new_storage, properties, publish_all, replay, restore_inventory,
    CAPTURE_ID,
};

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn restore_recreates_inventory_and_messages() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/topicA", 0);
    for value in ["v1", "v2", "v3"] {
        source
            .add_message(
                "t1/ns1/topicA",
                OutgoingMessage {
                    content: format!("payload-{}", value).into_bytes(),
                    properties: properties(&[("k", value)]),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let storage = new_storage();
    let captured = capture(&source, storage.clone()).await;
    assert!(!captured.has_failures(), "{}", captured);

    let inventory = load_inventory(storage.as_ref(), CAPTURE_ID).await.unwrap();
    assert_eq!(inventory.len(), 3);

    let manifest = CaptureManifest::load(storage.as_ref(), CAPTURE_ID).await.unwrap();
    assert_eq!(manifest.topics.len(), 1);
    let topic = &manifest.topics[0];
    assert_eq!(topic.topic, "persistent://t1/ns1/topicA");
    assert_eq!(topic.message_count, 3);

    let data = storage.get(&topic.key).await.unwrap();
    let records: Vec<CapturedMessage> = parse_records(&topic.key, &data)
        .into_iter()
        .map(|r| match r {
            ParsedRecord::Message(m) => m,
            ParsedRecord::Corrupt(e) => panic!("corrupt record: {}", e),
        })
        .collect();
    assert_eq!(records.len(), 3);
    for (i, value) in ["v1", "v2", "v3"].iter().enumerate() {
        assert_eq!(records[i].sequence, i as u64);
        assert_eq!(records[i].properties, properties(&[("k", *value)]));
    }

    let target = InMemoryCluster::standalone();
    let restored = restore_inventory(&target, storage.as_ref()).await;
    assert!(!restored.has_failures(), "{}", restored);
    assert_eq!(
        restored.created,
        vec!["t1", "t1/ns1", "persistent://t1/ns1/topicA"]
    );
    assert_eq!(target.tenant_clusters("t1"), Some(vec!["standalone".to_string()]));
    assert_eq!(target.topic_partitions("t1/ns1/topicA"), Some(0));

    let replayed = replay(&target, storage.clone()).await;
    assert!(!replayed.has_failures(), "{}", replayed);
    assert_eq!(replayed.totals.replayed, 3);

    let messages = target.messages("t1/ns1/topicA");
    assert_eq!(messages.len(), 3);
    for (i, value) in ["v1", "v2", "v3"].iter().enumerate() {
        assert_eq!(messages[i].properties["k"], *value);
        assert_eq!(messages[i].content, format!("payload-{}", value).into_bytes());
    }
}

#[tokio::test]
async fn restore_twice_creates_nothing_new() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/topicA", 0);
    source.add_topic("t1/ns2/orders", 2);
    publish_all(&source, "t1/ns1/topicA", &["v1", "v2", "v3"]);

    let storage = new_storage();
    capture(&source, storage.clone()).await;

    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;
    replay(&target, storage.clone()).await;

    let inventory = restore_inventory(&target, storage.as_ref()).await;
    assert!(inventory.created.is_empty());
    assert_eq!(inventory.existing.len(), 5);
    assert!(!inventory.has_failures());

    let replayed = replay(&target, storage).await;
    assert_eq!(replayed.totals.replayed, 0);
    assert_eq!(replayed.totals.skipped, 3);
    assert_eq!(contents(&target, "t1/ns1/topicA"), vec!["v1", "v2", "v3"]);
}

#[tokio::test]
async fn binary_content_and_metadata_survive() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/blobs", 0);
    let payload: Vec<u8> = (0..=255u8).chain([0, 0, 255, b'\n']).collect();
    source
        .add_message(
            "t1/ns1/blobs",
            OutgoingMessage {
                content: payload.clone(),
                properties: properties(&[("origin", "eu-west"), ("unicode", "añ✓")]),
                partition_key: Some("device-7".to_string()),
                event_timestamp: Some(1_700_000_000_123),
            },
        )
        .unwrap();
    source
        .add_message("t1/ns1/blobs", OutgoingMessage::default())
        .unwrap();

    let storage = new_storage();
    capture(&source, storage.clone()).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;
    replay(&target, storage).await;

    let restored = target.messages("t1/ns1/blobs");
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].content, payload);
    assert_eq!(restored[0].properties, properties(&[("origin", "eu-west"), ("unicode", "añ✓")]));
    assert_eq!(restored[0].partition_key.as_deref(), Some("device-7"));
    assert_eq!(restored[0].event_timestamp, Some(1_700_000_000_123));

    assert!(restored[1].content.is_empty());
    assert!(restored[1].properties.is_empty());
    assert_eq!(restored[1].partition_key, None);
    assert_eq!(restored[1].event_timestamp, None);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn partition_mismatch_is_reported_not_fixed() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/orders", 3);
    source.add_topic("t1/ns1/audit", 0);

    let storage = new_storage();
    capture(&source, storage.clone()).await;

    let target = InMemoryCluster::new();
    target.add_topic("t1/ns1/orders", 1);
    let inventory = restore_inventory(&target, storage.as_ref()).await;

    assert!(inventory.has_failures());
    assert_eq!(inventory.conflicts.len(), 1);
    assert_eq!(inventory.conflicts[0].name, "persistent://t1/ns1/orders");
    assert!(inventory.conflicts[0].error.contains("1 partitions"));
    assert_eq!(target.topic_partitions("t1/ns1/orders"), Some(1));
    assert_eq!(target.topic_partitions("t1/ns1/audit"), Some(0));
}
