//! Destructive cleanup of a cluster's non-system resources.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::ClusterAdmin;
use crate::config::{CaptureOptions, Config};
use crate::enumerate::InventoryEnumerator;
use crate::report::{ItemFailure, PurgeReport};
use crate::retry::RetryPolicy;
use crate::Result;

/// Deletes every non-system topic, namespace and tenant, children first
pub struct ResourcePurger {
    admin: Arc<dyn ClusterAdmin>,
    options: CaptureOptions,
    retry: RetryPolicy,
}

impl ResourcePurger {
    /// `options` supplies the system tenants and namespaces to preserve
    pub fn new(admin: Arc<dyn ClusterAdmin>, options: &CaptureOptions) -> Self {
        let options = CaptureOptions {
            include_system_resources: false,
            // Everything inside a user namespace goes, or the namespace cannot
            include_system_topics: true,
            topics: Default::default(),
            ..options.clone()
        };
        Self {
            admin,
            options,
            retry: RetryPolicy::default(),
        }
    }

    /// Purger preserving the configured system resources, with the configured backoff
    pub fn from_config(admin: Arc<dyn ClusterAdmin>, config: &Config) -> Self {
        Self::new(admin, &config.capture).with_retry_policy(config.replay.retry_policy())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn purge(&self) -> Result<PurgeReport> {
        let enumerator = InventoryEnumerator::new(self.admin.clone(), self.options.clone())?;
        let inventory = self
            .retry
            .retry("Inventory enumeration", || enumerator.enumerate())
            .await?
            .inventory;

        let mut report = PurgeReport::default();

        for (topic, partitions) in inventory.topics() {
            let result = self
                .retry
                .retry(&format!("Delete topic {}", topic), || {
                    self.admin.delete_topic(topic, partitions)
                })
                .await;
            record(&mut report, topic, result);
        }

        for namespace in inventory.namespaces() {
            let result = self
                .retry
                .retry(&format!("Delete namespace {}", namespace), || {
                    self.admin.delete_namespace(namespace)
                })
                .await;
            record(&mut report, namespace, result);
        }

        for tenant in inventory.tenants() {
            let prefix = format!("{}/", tenant);
            if self
                .options
                .system_namespaces
                .iter()
                .any(|ns| ns.starts_with(&prefix))
            {
                debug!("Keeping tenant {}: it holds system namespaces", tenant);
                continue;
            }
            let result = self
                .retry
                .retry(&format!("Delete tenant {}", tenant), || {
                    self.admin.delete_tenant(tenant)
                })
                .await;
            record(&mut report, tenant, result);
        }

        info!(
            "Purge finished: {} deleted, {} failed",
            report.deleted.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn record(report: &mut PurgeReport, name: &str, result: Result<()>) {
    match result {
        Ok(()) => {
            info!("Deleted {}", name);
            report.deleted.push(name.to_string());
        }
        Err(e) => {
            warn!("Failed to delete {}: {}", name, e);
            report.failed.push(ItemFailure::new(name, e));
        }
    }
}
