use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Outcome, OutputFormat};

#[derive(Parser)]
#[command(name = "pulsar-backup")]
#[command(about = "Pulsar cluster capture, restore and replay tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a cluster's inventory and messages into a new capture set
    Capture {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Capture set id (generated when omitted)
        #[arg(long)]
        capture_id: Option<String>,

        /// Re-capture only the topics that failed in an existing capture set
        #[arg(long)]
        retry_failed: bool,

        /// Summary format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Restore a capture set's inventory, then replay its messages
    Restore {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Capture set to restore (overrides the configuration file)
        #[arg(long)]
        capture_id: Option<String>,

        /// Create tenants, namespaces and topics only
        #[arg(long)]
        inventory_only: bool,

        /// Summary format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a capture set's messages, resuming from the replay cursor
    Replay {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Capture set to replay (overrides the configuration file)
        #[arg(long)]
        capture_id: Option<String>,

        /// Replay cursor name (overrides the configuration file)
        #[arg(long)]
        cursor: Option<String>,

        /// Summary format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List capture sets in a storage location
    List {
        /// Path to the storage location
        #[arg(short, long)]
        path: String,
    },

    /// Show a capture set's manifest and inventory
    Describe {
        /// Path to the storage location
        #[arg(short, long)]
        path: String,

        /// Capture set to describe
        #[arg(long)]
        capture_id: String,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check a capture set's record files against its manifest
    Validate {
        /// Path to the storage location
        #[arg(short, long)]
        path: String,

        /// Capture set to validate
        #[arg(long)]
        capture_id: String,
    },

    /// Show replay progress of a capture set
    Status {
        /// Path to the storage location
        #[arg(short, long)]
        path: String,

        /// Capture set to inspect
        #[arg(long)]
        capture_id: String,

        /// Replay cursor name
        #[arg(long, default_value = "default")]
        cursor: String,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print messages of a source topic without capturing them
    Peek {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Topic to read
        #[arg(short, long)]
        topic: String,

        /// Maximum number of messages to print
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output format (text, or json for JSON lines)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete every non-system tenant, namespace and topic on the target
    Purge {
        /// Path to the configuration file
        #[arg(short, long)]
        config: String,

        /// Confirm the deletion
        #[arg(long)]
        yes_delete_everything: bool,

        /// Summary format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let outcome = match cli.command {
        Commands::Capture {
            config,
            capture_id,
            retry_failed,
            format,
        } => {
            commands::capture::run(
                &config,
                capture_id.as_deref(),
                retry_failed,
                OutputFormat::from(format.as_str()),
            )
            .await?
        }
        Commands::Restore {
            config,
            capture_id,
            inventory_only,
            format,
        } => {
            commands::restore::run(
                &config,
                capture_id.as_deref(),
                inventory_only,
                OutputFormat::from(format.as_str()),
            )
            .await?
        }
        Commands::Replay {
            config,
            capture_id,
            cursor,
            format,
        } => {
            commands::replay::run(
                &config,
                capture_id.as_deref(),
                cursor.as_deref(),
                OutputFormat::from(format.as_str()),
            )
            .await?
        }
        Commands::List { path } => {
            commands::list::run(&path).await?;
            Outcome::Success
        }
        Commands::Describe {
            path,
            capture_id,
            format,
        } => {
            commands::describe::run(&path, &capture_id, OutputFormat::from(format.as_str()))
                .await?;
            Outcome::Success
        }
        Commands::Validate { path, capture_id } => {
            commands::validate::run(&path, &capture_id).await?
        }
        Commands::Status {
            path,
            capture_id,
            cursor,
            format,
        } => {
            commands::status::run(
                &path,
                &capture_id,
                &cursor,
                OutputFormat::from(format.as_str()),
            )
            .await?;
            Outcome::Success
        }
        Commands::Peek {
            config,
            topic,
            limit,
            format,
        } => {
            commands::peek::run(&config, &topic, limit, OutputFormat::from(format.as_str()))
                .await?;
            Outcome::Success
        }
        Commands::Purge {
            config,
            yes_delete_everything,
            format,
        } => {
            commands::purge::run(
                &config,
                yes_delete_everything,
                OutputFormat::from(format.as_str()),
            )
            .await?
        }
    };

    if outcome == Outcome::Failures {
        std::process::exit(2);
    }
    Ok(())
}
