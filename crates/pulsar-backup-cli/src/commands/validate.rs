use anyhow::Result;
use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::record::{parse_records, ParsedRecord};
use pulsar_backup_core::storage::{FilesystemBackend, StorageBackend};
use pulsar_backup_core::{CaptureManifest, TopicStatus};
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::Outcome;

#[derive(Debug, Default)]
struct ValidationReport {
    topics_checked: usize,
    topics_valid: usize,
    topics_failed_capture: usize,
    files_missing: usize,
    records_validated: u64,
    records_corrupt: u64,
    issues: Vec<String>,
}

impl ValidationReport {
    fn is_valid(&self) -> bool {
        self.files_missing == 0 && self.records_corrupt == 0 && self.issues.is_empty()
    }

    fn print(&self) {
        println!("\n=== Validation Report ===\n");
        println!("Topics Checked:     {}", self.topics_checked);
        println!("Topics Valid:       {}", self.topics_valid);
        println!("Capture Failed:     {}", self.topics_failed_capture);
        println!("Files Missing:      {}", self.files_missing);
        println!("Records Validated:  {}", self.records_validated);
        println!("Records Corrupt:    {}", self.records_corrupt);

        if !self.issues.is_empty() {
            println!("\nIssues Found:");
            for issue in &self.issues {
                println!("  - {}", issue);
            }
        }

        println!();
        if self.is_valid() {
            println!("Result: VALID");
        } else {
            println!("Result: INVALID");
        }
    }
}

pub async fn run(path: &str, capture_id: &str) -> Result<Outcome> {
    info!("Validating capture set: {}", capture_id);

    let storage = FilesystemBackend::new(PathBuf::from(path));
    let mut report = ValidationReport::default();

    let manifest = match CaptureManifest::load(&storage, capture_id).await {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to load manifest: {}", e);
            report.issues.push(format!("Manifest unreadable: {}", e));
            report.print();
            return Ok(Outcome::Failures);
        }
    };

    match load_inventory(&storage, capture_id).await {
        Ok(inventory) if inventory.counts() != manifest.inventory => {
            report.issues.push(format!(
                "Inventory counts {:?} differ from manifest {:?}",
                inventory.counts(),
                manifest.inventory
            ));
        }
        Ok(_) => {}
        Err(e) => report.issues.push(format!("Inventory unreadable: {}", e)),
    }

    println!("Validating capture set: {}", manifest.capture_id);
    if !manifest.is_completed() {
        report
            .issues
            .push("Capture set is not completed".to_string());
    }

    for topic in &manifest.topics {
        report.topics_checked += 1;
        if topic.status == TopicStatus::Failed {
            warn!("{} was not captured: {:?}", topic.topic, topic.error);
            report.topics_failed_capture += 1;
            continue;
        }

        if !storage.exists(&topic.key).await? {
            if topic.message_count == 0 {
                report.topics_valid += 1;
            } else {
                warn!("Missing record file: {}", topic.key);
                report.files_missing += 1;
                report.issues.push(format!("Missing record file: {}", topic.key));
            }
            continue;
        }

        let data = storage.get(&topic.key).await?;
        let mut messages = 0u64;
        let mut corrupt = 0u64;
        let mut out_of_order = false;
        for record in parse_records(&topic.key, &data) {
            match record {
                ParsedRecord::Message(message) => {
                    if message.sequence != messages + corrupt {
                        out_of_order = true;
                    }
                    messages += 1;
                }
                ParsedRecord::Corrupt(e) => {
                    error!("{}", e);
                    corrupt += 1;
                    report.issues.push(e.to_string());
                }
            }
        }

        report.records_validated += messages;
        report.records_corrupt += corrupt;
        if out_of_order {
            report
                .issues
                .push(format!("Sequence gap or reorder in {}", topic.key));
        }
        if messages + corrupt != topic.message_count {
            report.issues.push(format!(
                "Record count mismatch: {} (expected {}, got {})",
                topic.key,
                topic.message_count,
                messages + corrupt
            ));
        } else if corrupt == 0 && !out_of_order {
            report.topics_valid += 1;
        }
    }

    report.print();
    Ok(Outcome::from_failures(!report.is_valid()))
}
