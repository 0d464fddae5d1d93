//! Admin operations through the `pulsarctl` CLI.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{ClusterAdmin, CreateOutcome};
use crate::error::ClusterError;
use crate::inventory::normalize_topic;
use crate::Result;

/// Runs pulsarctl as `<program> <prefix_args...> <subcommand...>`
#[derive(Debug, Clone)]
pub struct PulsarctlAdmin {
    program: String,
    prefix_args: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TopicMetadata {
    #[serde(default)]
    partitions: u32,
}

impl PulsarctlAdmin {
    pub fn new(program: String, prefix_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            prefix_args,
            timeout,
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.prefix_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run a subcommand and return its stdout
    async fn run(&self, args: &[&str], entity: &str) -> std::result::Result<String, ClusterError> {
        let command = self.command_line(args);
        debug!("Running {}", command);

        let child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClusterError::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClusterError::Timeout(command.clone()))?
            .map_err(|e| ClusterError::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(classify_failure(command, entity, message))
    }

    async fn create(&self, args: &[&str], entity: &str) -> Result<CreateOutcome> {
        match self.run(args, entity).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(ClusterError::Rejected { status: 409, .. }) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map pulsarctl's error text onto the admin error taxonomy
fn classify_failure(command: String, entity: &str, message: String) -> ClusterError {
    let lower = message.to_lowercase();
    if lower.contains("already exist") || lower.contains("409") {
        ClusterError::Rejected {
            status: 409,
            message,
        }
    } else if lower.contains("404") || lower.contains("not found") || lower.contains("does not exist")
    {
        ClusterError::NotFound(entity.to_string())
    } else if lower.contains("connection refused")
        || lower.contains("no such host")
        || lower.contains("i/o timeout")
    {
        ClusterError::Unreachable {
            endpoint: command,
            message,
        }
    } else {
        ClusterError::CommandFailed { command, message }
    }
}

/// Parse pulsarctl table output into data rows of trimmed cells.
///
/// Border lines (`+---+`) are skipped and the first `|` row is the header.
/// Output without any table is read as one value per line.
pub fn parse_table(output: &str) -> Vec<Vec<String>> {
    let rows: Vec<Vec<String>> = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .map(|line| {
            line.trim_matches('|')
                .split('|')
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect();

    if rows.is_empty() {
        return output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('+'))
            .map(|line| vec![line.to_string()])
            .collect();
    }

    rows.into_iter()
        .skip(1)
        .filter(|row| row.first().is_some_and(|c| !c.is_empty()))
        .collect()
}

fn first_column(output: &str) -> Vec<String> {
    parse_table(output)
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect()
}

#[async_trait]
impl ClusterAdmin for PulsarctlAdmin {
    async fn list_clusters(&self) -> Result<Vec<String>> {
        Ok(first_column(&self.run(&["cluster", "list"], "clusters").await?))
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        Ok(first_column(&self.run(&["tenants", "list"], "tenants").await?))
    }

    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>> {
        Ok(first_column(
            &self.run(&["namespaces", "list", tenant], tenant).await?,
        ))
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>> {
        let output = self.run(&["topics", "list", namespace], namespace).await?;
        first_column(&output)
            .iter()
            .map(|t| normalize_topic(t))
            .collect()
    }

    async fn list_partitioned_topics(&self, namespace: &str) -> Result<Vec<String>> {
        // The second column flags partitioned topics with Y
        let output = self.run(&["topics", "list", namespace], namespace).await?;
        parse_table(&output)
            .into_iter()
            .filter(|row| row.get(1).is_some_and(|c| c.eq_ignore_ascii_case("y")))
            .map(|row| normalize_topic(&row[0]))
            .collect()
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        let output = self.run(&["topics", "get", topic], topic).await?;
        let metadata: TopicMetadata = serde_json::from_str(output.trim()).map_err(|e| {
            ClusterError::Client(format!("Invalid topic metadata for {}: {}", topic, e))
        })?;
        Ok(metadata.partitions)
    }

    async fn create_tenant(
        &self,
        name: &str,
        allowed_clusters: &[String],
    ) -> Result<CreateOutcome> {
        let clusters = allowed_clusters.join(",");
        self.create(
            &["tenants", "create", name, "--allowed-clusters", &clusters],
            name,
        )
        .await
    }

    async fn create_namespace(&self, name: &str) -> Result<CreateOutcome> {
        self.create(&["namespaces", "create", name], name).await
    }

    async fn create_topic(&self, name: &str, partitions: u32) -> Result<CreateOutcome> {
        let partitions = partitions.to_string();
        self.create(&["topics", "create", name, &partitions], name)
            .await
    }

    async fn delete_topic(&self, name: &str, partitions: u32) -> Result<()> {
        if partitions == 0 {
            self.run(&["topics", "delete", name, "--non-partitioned"], name)
                .await?;
        } else {
            self.run(&["topics", "delete", name], name).await?;
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.run(&["namespaces", "delete", name], name).await?;
        Ok(())
    }

    async fn delete_tenant(&self, name: &str) -> Result<()> {
        self.run(&["tenants", "delete", name], name).await?;
        Ok(())
    }
}
