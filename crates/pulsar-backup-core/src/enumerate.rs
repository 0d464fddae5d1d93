//! Inventory enumeration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::ClusterAdmin;
use crate::config::CaptureOptions;
use crate::filter::TopicFilter;
use crate::inventory::{Inventory, InventoryRecord, TopicName};
use crate::Result;

/// Enumerated inventory plus the branches that were skipped
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub inventory: Inventory,
    pub warnings: Vec<String>,
}

/// Walks tenants, namespaces and topics of a cluster
pub struct InventoryEnumerator {
    admin: Arc<dyn ClusterAdmin>,
    options: CaptureOptions,
    filter: TopicFilter,
}

impl InventoryEnumerator {
    pub fn new(admin: Arc<dyn ClusterAdmin>, options: CaptureOptions) -> Result<Self> {
        let filter = TopicFilter::new(&options.topics)?;
        Ok(Self {
            admin,
            options,
            filter,
        })
    }

    fn is_system_tenant(&self, tenant: &str) -> bool {
        !self.options.include_system_resources
            && self.options.system_tenants.iter().any(|t| t == tenant)
    }

    fn is_system_namespace(&self, namespace: &str) -> bool {
        !self.options.include_system_resources
            && self.options.system_namespaces.iter().any(|n| n == namespace)
    }

    /// Enumerate the cluster, parents before children.
    ///
    /// Failing to list tenants is fatal. A tenant or namespace that cannot be
    /// listed is skipped with a warning.
    pub async fn enumerate(&self) -> Result<Enumeration> {
        let mut tenants = self.admin.list_tenants().await?;
        tenants.sort();

        let mut enumeration = Enumeration::default();
        let mut namespaces = Vec::new();

        for tenant in tenants {
            if self.is_system_tenant(&tenant) {
                debug!("Skipping system tenant {}", tenant);
                continue;
            }

            let mut tenant_namespaces = match self.admin.list_namespaces(&tenant).await {
                Ok(list) => list,
                Err(e) if e.is_not_found() => {
                    warn!("Tenant {} disappeared during enumeration, skipping", tenant);
                    enumeration
                        .warnings
                        .push(format!("tenant {} skipped: {}", tenant, e));
                    continue;
                }
                Err(e) => {
                    warn!("Failed to list namespaces of {}: {}", tenant, e);
                    enumeration
                        .warnings
                        .push(format!("namespaces of tenant {} skipped: {}", tenant, e));
                    enumeration.inventory.push(InventoryRecord::tenant(&tenant));
                    continue;
                }
            };
            tenant_namespaces.sort();

            enumeration.inventory.push(InventoryRecord::tenant(&tenant));
            namespaces.extend(
                tenant_namespaces
                    .into_iter()
                    .filter(|ns| !self.is_system_namespace(ns)),
            );
        }

        for namespace in namespaces {
            match self.namespace_topics(&namespace).await {
                Ok(topics) => {
                    enumeration
                        .inventory
                        .push(InventoryRecord::namespace(&namespace)?);
                    for (topic, partitions) in topics {
                        enumeration
                            .inventory
                            .push(InventoryRecord::topic(&topic, partitions)?);
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!("Namespace {} disappeared during enumeration, skipping", namespace);
                    enumeration
                        .warnings
                        .push(format!("namespace {} skipped: {}", namespace, e));
                }
                Err(e) => {
                    warn!("Failed to list topics of {}: {}", namespace, e);
                    enumeration
                        .warnings
                        .push(format!("topics of namespace {} skipped: {}", namespace, e));
                    enumeration
                        .inventory
                        .push(InventoryRecord::namespace(&namespace)?);
                }
            }
        }

        let counts = enumeration.inventory.counts();
        info!(
            "Enumerated {} tenants, {} namespaces, {} topics ({} warnings)",
            counts.tenants,
            counts.namespaces,
            counts.topics,
            enumeration.warnings.len()
        );
        Ok(enumeration)
    }

    /// Sorted topics of a namespace with partition members folded into their parent
    async fn namespace_topics(&self, namespace: &str) -> Result<Vec<(String, u32)>> {
        let listed = self.admin.list_topics(namespace).await?;
        let partitioned = self.admin.list_partitioned_topics(namespace).await?;

        let mut plain = BTreeSet::new();
        // Parent topic to the highest partition index seen + 1
        let mut parents: BTreeMap<String, u32> = BTreeMap::new();

        for topic in partitioned {
            parents.entry(TopicName::parse(&topic)?.to_string()).or_insert(0);
        }
        for topic in listed {
            let name = TopicName::parse(&topic)?;
            match name.partition_parent() {
                Some((parent, index)) => {
                    let seen = parents.entry(parent.to_string()).or_insert(0);
                    *seen = (*seen).max(index + 1);
                }
                None => {
                    plain.insert(name.to_string());
                }
            }
        }

        let mut topics = Vec::new();
        for (parent, seen) in parents {
            plain.remove(&parent);
            if !self.selected(&parent)? {
                continue;
            }
            let partitions = match self.admin.partition_count(&parent).await {
                Ok(n) if n > 0 => n,
                Ok(_) => seen,
                Err(e) if seen > 0 => {
                    warn!(
                        "Partition metadata for {} unavailable ({}), using {} listed partitions",
                        parent, e, seen
                    );
                    seen
                }
                Err(e) => return Err(e),
            };
            topics.push((parent, partitions));
        }
        for topic in plain {
            if self.selected(&topic)? {
                topics.push((topic, 0));
            }
        }

        topics.sort();
        Ok(topics)
    }

    fn selected(&self, topic: &str) -> Result<bool> {
        let name = TopicName::parse(topic)?;
        if name.is_system_topic() && !self.options.include_system_topics {
            debug!("Skipping system topic {}", topic);
            return Ok(false);
        }
        Ok(self.filter.matches(topic))
    }
}
