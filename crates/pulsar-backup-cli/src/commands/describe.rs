use anyhow::Result;
use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::storage::{FilesystemBackend, StorageBackend};
use pulsar_backup_core::{CaptureManifest, CaptureState, Inventory, InventoryRecord, TopicStatus};
use serde::Serialize;
use tracing::{info, warn};

use super::OutputFormat;

/// Manifest plus inventory, for machine-readable output
#[derive(Serialize)]
struct Description<'a> {
    manifest: &'a CaptureManifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    inventory: Option<Vec<&'a InventoryRecord>>,
}

pub async fn run(path: &str, capture_id: &str, format: OutputFormat) -> Result<()> {
    let storage = FilesystemBackend::new(path.into());

    info!("Loading capture manifest: {}", capture_id);
    let manifest = CaptureManifest::load(&storage, capture_id).await?;
    let inventory = match load_inventory(&storage, capture_id).await {
        Ok(inventory) => Some(inventory),
        Err(e) => {
            warn!("Inventory of {} unavailable: {}", capture_id, e);
            None
        }
    };

    match format {
        OutputFormat::Json => {
            let description = Description {
                manifest: &manifest,
                inventory: inventory.as_ref().map(|i| i.records().collect()),
            };
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        OutputFormat::Yaml => {
            let description = Description {
                manifest: &manifest,
                inventory: inventory.as_ref().map(|i| i.records().collect()),
            };
            println!("{}", serde_yaml::to_string(&description)?);
        }
        OutputFormat::Text => {
            let mut sizes = Vec::with_capacity(manifest.topics.len());
            for topic in &manifest.topics {
                sizes.push(storage.size(&topic.key).await.unwrap_or(0));
            }
            print_manifest_text(&manifest, inventory.as_ref(), &sizes);
        }
    }

    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn print_manifest_text(manifest: &CaptureManifest, inventory: Option<&Inventory>, sizes: &[u64]) {
    println!("╔══════════════════════════════════════════════════════════════════════╗");
    println!("║                          CAPTURE MANIFEST                            ║");
    println!("╠══════════════════════════════════════════════════════════════════════╣");
    println!("║ Capture ID:     {:55} ║", manifest.capture_id);
    println!("║ Created:        {:55} ║", format_timestamp(manifest.created_at));
    if let Some(completed_at) = manifest.completed_at {
        println!("║ Completed:      {:55} ║", format_timestamp(completed_at));
    }
    let state = match manifest.state {
        CaptureState::Completed => "completed",
        CaptureState::InProgress => "in progress",
    };
    println!("║ State:          {:55} ║", state);
    if let Some(source) = &manifest.source {
        println!("║ Source:         {:55} ║", source);
    }
    println!("║ Format Version: {:55} ║", manifest.format_version);
    println!("╠══════════════════════════════════════════════════════════════════════╣");
    println!("║                              SUMMARY                                 ║");
    println!("╠══════════════════════════════════════════════════════════════════════╣");
    println!("║ Tenants:        {:55} ║", manifest.inventory.tenants);
    println!("║ Namespaces:     {:55} ║", manifest.inventory.namespaces);
    println!("║ Topics:         {:55} ║", manifest.inventory.topics);
    println!("║ Messages:       {:55} ║", manifest.total_messages());
    println!("║ Failed Topics:  {:55} ║", manifest.failed_topics().count());
    println!(
        "║ Stored Size:    {:55} ║",
        format_bytes(sizes.iter().sum())
    );

    if !manifest.warnings.is_empty() {
        println!("╠══════════════════════════════════════════════════════════════════════╣");
        println!("║                              WARNINGS                                ║");
        println!("╠══════════════════════════════════════════════════════════════════════╣");
        for warning in &manifest.warnings {
            println!("║ {:68} ║", warning);
        }
    }

    println!("╠══════════════════════════════════════════════════════════════════════╣");
    println!("║                              TOPICS                                  ║");
    println!("╠══════════════════════════════════════════════════════════════════════╣");

    for (topic, size) in manifest.topics.iter().zip(sizes) {
        let partitions = inventory
            .and_then(|inv| inv.topics().find(|(name, _)| *name == topic.topic))
            .map_or(0, |(_, partitions)| partitions);

        println!("║                                                                      ║");
        println!("║ Topic: {:64} ║", topic.topic);
        if partitions > 0 {
            println!("║   Partitions: {:57} ║", partitions);
        }
        println!("║   Messages:   {:57} ║", topic.message_count);
        println!("║   Size:       {:57} ║", format_bytes(*size));
        if let (Some(first), Some(last)) = (topic.first_timestamp, topic.last_timestamp) {
            println!(
                "║   Published:  {:57} ║",
                format!(
                    "{} - {}",
                    format_timestamp(first as i64),
                    format_timestamp(last as i64)
                )
            );
        }
        if topic.status == TopicStatus::Failed {
            println!(
                "║   FAILED:     {:57} ║",
                topic.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!("╚══════════════════════════════════════════════════════════════════════╝");
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
