use anyhow::Result;
use pulsar_backup_core::CaptureEngine;
use std::sync::Arc;
use tracing::info;

use super::{load_config, on_ctrl_c, print_report, Outcome, OutputFormat};

pub async fn run(
    config_path: &str,
    capture_id: Option<&str>,
    retry_failed: bool,
    format: OutputFormat,
) -> Result<Outcome> {
    let config = load_config(config_path, capture_id).await?;
    if retry_failed && config.capture_id.is_none() {
        anyhow::bail!("--retry-failed needs the capture id of an existing capture set");
    }

    let engine = Arc::new(CaptureEngine::new(&config).await?);
    info!("Starting capture: {}", engine.capture_id());

    let signal_engine = engine.clone();
    on_ctrl_c(move || signal_engine.shutdown());

    let report = if retry_failed {
        engine.retry_failed().await?
    } else {
        engine.run().await?
    };

    print_report(&report, format)?;
    Ok(Outcome::from_failures(report.has_failures()))
}
