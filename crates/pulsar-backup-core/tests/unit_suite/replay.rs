//! Replay scenario tests.
//!
//! Covers:
//! - Resuming an interrupted replay without duplicates
//! - Per-partition ordering
//! - Skipped topics and independent cursors

use pulsar_backup_core::config::TopicSelection;
use pulsar_backup_core::storage::StorageBackend;
use pulsar_backup_core::{InMemoryCluster, OutgoingMessage, ReplayEngine, ReplayOptions};
use std::sync::Arc;

use super::helpers::{
    capture, contents, new_storage, publish_all, replay, replay_engine, replay_options,
    restore_inventory, CAPTURE_ID,
};

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("m{}", i)).collect()
}

/// Capture a source holding `count` numbered messages per topic
async fn captured_source(topics: &[(&str, usize)]) -> (InMemoryCluster, Arc<dyn StorageBackend>) {
    let source = InMemoryCluster::new();
    for (topic, count) in topics {
        source.add_topic(topic, 0);
        let messages = numbered(*count);
        let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
        publish_all(&source, topic, &refs);
    }
    let storage = new_storage();
    capture(&source, storage.clone()).await;
    (source, storage)
}

// ============================================================================
// Resumption
// ============================================================================

#[tokio::test]
async fn interrupted_replay_resumes_without_duplicates() {
    let (_, storage) = captured_source(&[("t1/ns1/a", 10)]).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;

    // Broker goes away after four messages
    target.limit_publishes(Some(4));
    let first = replay(&target, storage.clone()).await;
    assert!(first.has_failures());
    assert_eq!(first.totals.replayed, 4);
    assert_eq!(first.totals.failed, 6);

    target.limit_publishes(None);
    let second = replay(&target, storage.clone()).await;
    assert!(!second.has_failures(), "{}", second);
    assert_eq!(second.totals.skipped, 4);
    assert_eq!(second.totals.replayed, 6);

    assert_eq!(contents(&target, "t1/ns1/a"), numbered(10));

    let third = replay(&target, storage).await;
    assert_eq!(third.totals.replayed, 0);
    assert_eq!(third.totals.skipped, 10);
    assert_eq!(contents(&target, "t1/ns1/a").len(), 10);
}

#[tokio::test]
async fn transient_publish_failures_do_not_duplicate() {
    let (_, storage) = captured_source(&[("t1/ns1/a", 3)]).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;
    target.fail_publishes("persistent://t1/ns1/a", 2);

    let report = replay(&target, storage).await;

    assert!(!report.has_failures(), "{}", report);
    assert_eq!(contents(&target, "t1/ns1/a"), numbered(3));
    assert_eq!(target.publish_attempts(), 5);
}

#[tokio::test]
async fn messages_without_broker_ids_replay_once() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/a", 0);
    // Identical content and timestamps still get distinct ids
    publish_all(&source, "t1/ns1/a", &["same", "same", "same"]);
    source.omit_message_ids(true);

    let storage = new_storage();
    capture(&source, storage.clone()).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;

    let first = replay(&target, storage.clone()).await;
    assert_eq!(first.totals.replayed, 3);
    let second = replay(&target, storage).await;
    assert_eq!(second.totals.skipped, 3);
    assert_eq!(contents(&target, "t1/ns1/a"), vec!["same", "same", "same"]);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn keyed_partition_order_is_preserved() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/orders", 3);
    for i in 0..12 {
        source
            .add_message(
                "t1/ns1/orders",
                OutgoingMessage {
                    content: format!("o{}", i).into_bytes(),
                    partition_key: Some(format!("k{}", i % 4)),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let storage = new_storage();
    capture(&source, storage.clone()).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;
    let report = replay(&target, storage).await;

    assert!(!report.has_failures(), "{}", report);
    assert_eq!(report.totals.replayed, 12);
    assert_eq!(
        contents(&target, "t1/ns1/orders"),
        contents(&source, "t1/ns1/orders")
    );
}

// ============================================================================
// Selection and cursors
// ============================================================================

#[tokio::test]
async fn failed_capture_topics_are_skipped() {
    let source = InMemoryCluster::new();
    source.add_topic("t1/ns1/a", 0);
    source.add_topic("t1/ns1/b", 0);
    publish_all(&source, "t1/ns1/a", &["a0"]);
    publish_all(&source, "t1/ns1/b", &["b0", "b1"]);
    source.fail_reads("persistent://t1/ns1/b", 0);

    let storage = new_storage();
    capture(&source, storage.clone()).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;
    let report = replay(&target, storage).await;

    assert!(report.has_failures());
    assert_eq!(report.skipped_topics, vec!["persistent://t1/ns1/b"]);
    assert_eq!(contents(&target, "t1/ns1/a"), vec!["a0"]);
    assert!(contents(&target, "t1/ns1/b").is_empty());
}

#[tokio::test]
async fn topic_selection_limits_replay() {
    let (_, storage) = captured_source(&[("t1/ns1/a", 2), ("t1/ns1/b", 2)]).await;
    let target = InMemoryCluster::new();
    restore_inventory(&target, storage.as_ref()).await;

    let options = ReplayOptions {
        topics: TopicSelection {
            include: vec!["t1/ns1/b".to_string()],
            exclude: vec![],
        },
        ..replay_options()
    };
    let engine =
        ReplayEngine::with_components(CAPTURE_ID, options, Arc::new(target.clone()), storage);
    let report = engine.replay_messages().await.unwrap();

    assert_eq!(report.topics.len(), 1);
    assert!(report.topic("persistent://t1/ns1/b").is_some());
    assert!(contents(&target, "t1/ns1/a").is_empty());
    assert_eq!(contents(&target, "t1/ns1/b"), numbered(2));
}

#[tokio::test]
async fn cursors_are_independent() {
    let (_, storage) = captured_source(&[("t1/ns1/a", 3)]).await;
    let first_target = InMemoryCluster::new();
    restore_inventory(&first_target, storage.as_ref()).await;
    replay_engine(&first_target, storage.clone())
        .replay_messages()
        .await
        .unwrap();

    let second_target = InMemoryCluster::new();
    restore_inventory(&second_target, storage.as_ref()).await;
    let options = ReplayOptions {
        cursor_name: "second-target".to_string(),
        ..replay_options()
    };
    let report = ReplayEngine::with_components(
        CAPTURE_ID,
        options,
        Arc::new(second_target.clone()),
        storage,
    )
    .replay_messages()
    .await
    .unwrap();

    assert_eq!(report.cursor, "second-target");
    assert_eq!(report.totals.replayed, 3);
    assert_eq!(contents(&second_target, "t1/ns1/a"), numbered(3));
}
