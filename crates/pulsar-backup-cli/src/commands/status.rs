use anyhow::Result;
use pulsar_backup_core::storage::{FilesystemBackend, StorageBackend};
use pulsar_backup_core::{CaptureManifest, ReplayCursor, ShardProgress};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::OutputFormat;

#[derive(Serialize)]
struct ReplayStatus {
    capture_id: String,
    cursor: String,
    started: bool,
    topics: Vec<ShardProgress>,
}

/// Show replay progress of a capture set under a cursor
pub async fn run(path: &str, capture_id: &str, cursor: &str, format: OutputFormat) -> Result<()> {
    info!("Getting replay status for {} (cursor {})", capture_id, cursor);

    let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new(PathBuf::from(path)));
    let manifest = CaptureManifest::load(storage.as_ref(), capture_id).await?;
    let replay_cursor = ReplayCursor::new(capture_id, cursor);

    let status = ReplayStatus {
        capture_id: capture_id.to_string(),
        cursor: cursor.to_string(),
        started: replay_cursor.exists(storage.as_ref()).await?,
        topics: replay_cursor.progress(storage, &manifest).await?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&status)?),
        OutputFormat::Text => print_status(&status),
    }
    Ok(())
}

fn print_status(status: &ReplayStatus) {
    println!("Capture set: {}", status.capture_id);
    println!("Cursor:      {}", status.cursor);
    if !status.started {
        println!("\nNo replay has run under this cursor yet");
        return;
    }

    println!(
        "\n{:<60} {:>10} {:>10} {:>8} {:>10}",
        "TOPIC", "CAPTURED", "REPLAYED", "FAILED", "PENDING"
    );
    let (mut captured, mut replayed, mut failed) = (0u64, 0u64, 0u64);
    for topic in &status.topics {
        let pending = topic
            .captured
            .saturating_sub((topic.replayed + topic.failed) as u64);
        println!(
            "{:<60} {:>10} {:>10} {:>8} {:>10}",
            topic.topic, topic.captured, topic.replayed, topic.failed, pending
        );
        captured += topic.captured;
        replayed += topic.replayed as u64;
        failed += topic.failed as u64;
    }
    println!(
        "\nTotal: {} captured, {} replayed, {} failed, {} pending",
        captured,
        replayed,
        failed,
        captured.saturating_sub(replayed + failed)
    );
}
