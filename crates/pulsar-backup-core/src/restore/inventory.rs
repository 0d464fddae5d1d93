//! Inventory restore: recreate tenants, namespaces and topics on a target.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterAdmin, CreateOutcome};
use crate::config::{Config, RestoreOptions};
use crate::inventory::{Inventory, InventoryRecord};
use crate::report::{InventoryRestoreReport, ItemFailure};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Recreates a captured inventory in dependency order
pub struct InventoryRestorer {
    admin: Arc<dyn ClusterAdmin>,
    allowed_clusters: Vec<String>,
    retry: RetryPolicy,
}

impl InventoryRestorer {
    pub fn new(admin: Arc<dyn ClusterAdmin>, options: &RestoreOptions) -> Self {
        Self {
            admin,
            allowed_clusters: options.allowed_clusters.clone(),
            retry: RetryPolicy::default(),
        }
    }

    /// Restorer using the configured allowed clusters and retry backoff
    pub fn from_config(admin: Arc<dyn ClusterAdmin>, config: &Config) -> Self {
        Self::new(admin, &config.restore).with_retry_policy(config.replay.retry_policy())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create every inventory entity that does not exist yet.
    ///
    /// Existing entities count as success, so running this twice is
    /// harmless. Only failing to reach the target at the start is fatal.
    pub async fn restore_inventory(&self, inventory: &Inventory) -> Result<InventoryRestoreReport> {
        let clusters = self.tenant_clusters().await?;
        let mut report = InventoryRestoreReport::default();

        // Records are ordered tenants, namespaces, topics
        for record in inventory.records() {
            let name = record.name().to_string();
            let outcome = match record {
                InventoryRecord::Tenant { name } => {
                    self.retry
                        .retry(&format!("Create tenant {}", name), || {
                            self.admin.create_tenant(name, &clusters)
                        })
                        .await
                }
                InventoryRecord::Namespace { name, .. } => {
                    self.retry
                        .retry(&format!("Create namespace {}", name), || {
                            self.admin.create_namespace(name)
                        })
                        .await
                }
                InventoryRecord::Topic {
                    name, partitions, ..
                } => self.restore_topic(name, *partitions).await,
            };

            match outcome {
                Ok(CreateOutcome::Created) => {
                    debug!("Created {} {}", record.kind(), name);
                    report.created.push(name);
                }
                Ok(CreateOutcome::AlreadyExists) => {
                    debug!("{} {} already exists", record.kind(), name);
                    report.existing.push(name);
                }
                Err(e @ Error::RestoreConflict { .. }) => {
                    warn!("{}", e);
                    report.conflicts.push(ItemFailure::new(name, e));
                }
                Err(e) => {
                    warn!("Failed to create {} {}: {}", record.kind(), name, e);
                    report.failed.push(ItemFailure::new(name, e));
                }
            }
        }

        info!(
            "Inventory restore: {} created, {} existing, {} conflicts, {} failed",
            report.created.len(),
            report.existing.len(),
            report.conflicts.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Configured clusters, or every cluster the target knows
    async fn tenant_clusters(&self) -> Result<Vec<String>> {
        let known = self
            .retry
            .retry("List clusters", || self.admin.list_clusters())
            .await?;
        if self.allowed_clusters.is_empty() {
            debug!("Creating tenants for clusters {:?}", known);
            Ok(known)
        } else {
            Ok(self.allowed_clusters.clone())
        }
    }

    async fn restore_topic(&self, name: &str, partitions: u32) -> Result<CreateOutcome> {
        let outcome = self
            .retry
            .retry(&format!("Create topic {}", name), || {
                self.admin.create_topic(name, partitions)
            })
            .await?;
        if outcome == CreateOutcome::Created {
            return Ok(outcome);
        }

        let existing = self
            .retry
            .retry(&format!("Partition metadata of {}", name), || {
                self.admin.partition_count(name)
            })
            .await?;
        if existing != partitions {
            return Err(Error::RestoreConflict {
                entity: name.to_string(),
                message: format!(
                    "exists with {} partitions, captured with {}",
                    existing, partitions
                ),
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;

    fn inventory() -> Inventory {
        Inventory::from_records(vec![
            InventoryRecord::tenant("t1"),
            InventoryRecord::namespace("t1/ns1").unwrap(),
            InventoryRecord::topic("persistent://t1/ns1/a", 0).unwrap(),
            InventoryRecord::topic("persistent://t1/ns1/orders", 3).unwrap(),
        ])
    }

    #[tokio::test]
    async fn test_restore_creates_in_order_and_is_idempotent() {
        let cluster = InMemoryCluster::new();
        let restorer = InventoryRestorer::new(Arc::new(cluster.clone()), &RestoreOptions::default());

        let first = restorer.restore_inventory(&inventory()).await.unwrap();
        assert_eq!(first.created.len(), 4);
        assert!(!first.has_failures());
        assert_eq!(cluster.tenant_clusters("t1"), Some(vec!["standalone".to_string()]));
        assert_eq!(cluster.topic_partitions("t1/ns1/orders"), Some(3));

        let second = restorer.restore_inventory(&inventory()).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), 4);
        assert!(!second.has_failures());
    }

    #[tokio::test]
    async fn test_partition_mismatch_is_conflict() {
        let cluster = InMemoryCluster::new();
        cluster.add_topic("t1/ns1/orders", 4);
        let restorer = InventoryRestorer::new(Arc::new(cluster.clone()), &RestoreOptions::default());

        let report = restorer.restore_inventory(&inventory()).await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].name, "persistent://t1/ns1/orders");
        assert_eq!(cluster.topic_partitions("t1/ns1/orders"), Some(4));
        assert!(report.created.contains(&"persistent://t1/ns1/a".to_string()));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let cluster = InMemoryCluster::new();
        let options = RestoreOptions {
            allowed_clusters: vec!["missing".to_string()],
        };
        let restorer = InventoryRestorer::new(Arc::new(cluster.clone()), &options);

        let report = restorer.restore_inventory(&inventory()).await.unwrap();
        // Tenant rejected, so its namespace and topics fail too
        assert_eq!(report.failed.len(), 4);
        assert!(report.failed[0].error.contains("412"));
    }

    #[test]
    fn test_from_config_uses_configured_backoff() {
        let config = Config::from_yaml(
            "storage:\n  backend: memory\nrestore:\n  allowed_clusters: [east]\nreplay:\n  max_attempts: 2\n  initial_backoff_ms: 7\n  max_backoff_ms: 70\n",
        )
        .unwrap();
        let restorer = InventoryRestorer::from_config(Arc::new(InMemoryCluster::new()), &config);

        assert_eq!(restorer.retry, config.replay.retry_policy());
        assert_eq!(restorer.retry.max_attempts, 2);
        assert_eq!(restorer.allowed_clusters, vec!["east".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_fatal() {
        let cluster = InMemoryCluster::new();
        cluster.set_unreachable(true);
        let restorer = InventoryRestorer::new(Arc::new(cluster), &RestoreOptions::default())
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                initial_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(1),
            });

        let err = restorer.restore_inventory(&inventory()).await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }
}
