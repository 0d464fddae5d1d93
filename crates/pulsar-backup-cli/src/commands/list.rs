use anyhow::Result;
use pulsar_backup_core::manifest::list_capture_sets;
use pulsar_backup_core::storage::FilesystemBackend;
use pulsar_backup_core::{CaptureManifest, CaptureState};
use tracing::{info, warn};

pub async fn run(path: &str) -> Result<()> {
    let storage = FilesystemBackend::new(path.into());

    info!("Listing capture sets in: {}", path);
    let ids = list_capture_sets(&storage).await?;
    if ids.is_empty() {
        println!("No capture sets found in {}", path);
        return Ok(());
    }

    println!("Available capture sets:");
    for id in ids {
        match CaptureManifest::load(&storage, &id).await {
            Ok(manifest) => {
                let state = match manifest.state {
                    CaptureState::Completed => "completed",
                    CaptureState::InProgress => "in progress",
                };
                println!(
                    "  - {} ({}, {} topics, {} messages, {} failed)",
                    id,
                    state,
                    manifest.topics.len(),
                    manifest.total_messages(),
                    manifest.failed_topics().count()
                );
            }
            Err(e) => {
                warn!("Unreadable manifest for {}: {}", id, e);
                println!("  - {} (unreadable manifest)", id);
            }
        }
    }

    Ok(())
}
