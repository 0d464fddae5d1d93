use anyhow::Result;
use pulsar_backup_core::cluster::connect_admin;
use pulsar_backup_core::{Operation, ResourcePurger};
use tracing::warn;

use super::{load_config, print_report, Outcome, OutputFormat};

/// Delete every non-system topic, namespace and tenant on the target
pub async fn run(config_path: &str, confirmed: bool, format: OutputFormat) -> Result<Outcome> {
    if !confirmed {
        anyhow::bail!(
            "purge deletes ALL non-system topics, namespaces and tenants on the target; \
             pass --yes-delete-everything to confirm"
        );
    }

    let config = load_config(config_path, None).await?;
    config.validate_for(Operation::Purge)?;
    let target = config.target()?;
    warn!("Purging all non-system resources on {}", target.service_url);

    let purger = ResourcePurger::from_config(connect_admin(target)?, &config);
    let report = purger.purge().await?;
    print_report(&report, format)?;
    Ok(Outcome::from_failures(report.has_failures()))
}
