use anyhow::Result;
use pulsar_backup_core::{Config, ReplayEngine, ReplayReport};
use std::sync::Arc;
use tracing::info;

use super::{load_config, on_ctrl_c, print_report, require_capture_id, Outcome, OutputFormat};

pub async fn run(
    config_path: &str,
    capture_id: Option<&str>,
    cursor: Option<&str>,
    format: OutputFormat,
) -> Result<Outcome> {
    let mut config = load_config(config_path, capture_id).await?;
    if let Some(cursor) = cursor {
        config.replay.cursor_name = cursor.to_string();
    }
    let capture_id = require_capture_id(&config)?;
    replay(&config, &capture_id, format).await
}

/// Replay a capture set's messages into the configured target
pub async fn replay(config: &Config, capture_id: &str, format: OutputFormat) -> Result<Outcome> {
    let report = replay_report(config, capture_id).await?;
    print_report(&report, format)?;
    Ok(Outcome::from_failures(report.has_failures()))
}

/// Run a replay with Ctrl-C wired to its shutdown, without printing
pub async fn replay_report(config: &Config, capture_id: &str) -> Result<ReplayReport> {
    let engine = Arc::new(ReplayEngine::new(config, capture_id).await?);
    info!(
        "Replaying {} with cursor {}",
        capture_id,
        engine.cursor().name()
    );

    let signal_engine = engine.clone();
    on_ctrl_c(move || signal_engine.shutdown());

    Ok(engine.replay_messages().await?)
}
