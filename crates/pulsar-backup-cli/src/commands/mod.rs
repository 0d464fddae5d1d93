pub mod capture;
pub mod describe;
pub mod list;
pub mod peek;
pub mod purge;
pub mod replay;
pub mod restore;
pub mod status;
pub mod validate;

use anyhow::Result;
use pulsar_backup_core::Config;
use serde::Serialize;
use std::fmt::Display;
use tracing::{info, warn};

/// How a command finished; failures map to exit code 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failures,
}

impl Outcome {
    pub fn from_failures(has_failures: bool) -> Self {
        if has_failures {
            Self::Failures
        } else {
            Self::Success
        }
    }
}

/// Summary output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" => Self::Yaml,
            _ => Self::Text,
        }
    }
}

/// Print a run summary in the requested format
pub fn print_report<T: Serialize + Display>(report: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Text => print!("{}", report),
    }
    Ok(())
}

/// Load a configuration file, applying a command-line capture id
pub async fn load_config(config_path: &str, capture_id: Option<&str>) -> Result<Config> {
    info!("Loading configuration from: {}", config_path);
    let mut config = Config::load(config_path).await?;
    if let Some(id) = capture_id {
        config.capture_id = Some(id.to_string());
    }
    Ok(config)
}

/// Capture id from the command line or the configuration
pub fn require_capture_id(config: &Config) -> Result<String> {
    config
        .capture_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("A capture id is required (--capture-id or capture_id in the config)"))
}

/// Run `on_signal` once Ctrl-C is pressed
pub fn on_ctrl_c<F>(on_signal: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight work");
            on_signal();
        }
    });
}
