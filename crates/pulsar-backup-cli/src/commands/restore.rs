use anyhow::Result;
use pulsar_backup_core::cluster::connect_admin;
use pulsar_backup_core::manifest::load_inventory;
use pulsar_backup_core::storage::create_backend;
use pulsar_backup_core::{CaptureManifest, InventoryRestorer, Operation, RestoreReport};
use tracing::{info, warn};

use super::{load_config, print_report, replay, require_capture_id, Outcome, OutputFormat};

pub async fn run(
    config_path: &str,
    capture_id: Option<&str>,
    inventory_only: bool,
    format: OutputFormat,
) -> Result<Outcome> {
    let config = load_config(config_path, capture_id).await?;
    config.validate_for(Operation::Restore)?;
    let capture_id = require_capture_id(&config)?;

    let storage = create_backend(&config.storage)?;
    let manifest = CaptureManifest::load(storage.as_ref(), &capture_id).await?;
    if !manifest.is_completed() {
        warn!("Capture set {} is not completed", capture_id);
    }
    let inventory = load_inventory(storage.as_ref(), &capture_id).await?;

    info!(
        "Restoring inventory of {} ({} records)",
        capture_id,
        inventory.len()
    );
    let admin = connect_admin(config.target()?)?;
    let restorer = InventoryRestorer::from_config(admin, &config);
    let inventory_report = restorer.restore_inventory(&inventory).await?;

    let replay_report = if inventory_only {
        None
    } else {
        Some(replay::replay_report(&config, &capture_id).await?)
    };

    let report = RestoreReport {
        inventory: inventory_report,
        replay: replay_report,
    };
    print_report(&report, format)?;
    Ok(Outcome::from_failures(report.has_failures()))
}
