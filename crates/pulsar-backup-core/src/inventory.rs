//! Inventory records: the tenants, namespaces and topics of a cluster.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::{Error, Result};

/// Topic domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicDomain {
    Persistent,
    NonPersistent,
}

impl TopicDomain {
    /// Scheme string as it appears in topic names and admin paths
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicDomain::Persistent => "persistent",
            TopicDomain::NonPersistent => "non-persistent",
        }
    }
}

/// A parsed fully-qualified topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    pub domain: TopicDomain,
    pub tenant: String,
    pub namespace: String,
    pub local: String,
}

impl TopicName {
    /// Parse `persistent://t/ns/x`, `non-persistent://t/ns/x` or bare `t/ns/x`
    pub fn parse(name: &str) -> Result<Self> {
        let (domain, rest) = if let Some(rest) = name.strip_prefix("persistent://") {
            (TopicDomain::Persistent, rest)
        } else if let Some(rest) = name.strip_prefix("non-persistent://") {
            (TopicDomain::NonPersistent, rest)
        } else if name.contains("://") {
            return Err(Error::Config(format!("Unsupported topic domain: {}", name)));
        } else {
            (TopicDomain::Persistent, name)
        };

        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tenant), Some(namespace), Some(local))
                if !tenant.is_empty() && !namespace.is_empty() && !local.is_empty() =>
            {
                Ok(Self {
                    domain,
                    tenant: tenant.to_string(),
                    namespace: namespace.to_string(),
                    local: local.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "Topic name must be tenant/namespace/topic: {}",
                name
            ))),
        }
    }

    /// `tenant/namespace`
    pub fn namespace_path(&self) -> String {
        format!("{}/{}", self.tenant, self.namespace)
    }

    /// Admin REST path segment: `persistent/t/ns/x`
    pub fn rest_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.domain.as_str(),
            self.tenant,
            self.namespace,
            self.local
        )
    }

    /// The partitioned parent and partition index for a `-partition-N` member
    pub fn partition_parent(&self) -> Option<(TopicName, u32)> {
        let (base, index) = self.local.rsplit_once("-partition-")?;
        let index: u32 = index.parse().ok()?;
        if base.is_empty() {
            return None;
        }
        Some((
            TopicName {
                local: base.to_string(),
                ..self.clone()
            },
            index,
        ))
    }

    /// Name of partition `index` of this topic
    pub fn partition(&self, index: u32) -> TopicName {
        TopicName {
            local: format!("{}-partition-{}", self.local, index),
            ..self.clone()
        }
    }

    /// Local names beginning with `__` are broker-internal
    pub fn is_system_topic(&self) -> bool {
        self.local.starts_with("__")
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.domain.as_str(),
            self.tenant,
            self.namespace,
            self.local
        )
    }
}

/// Normalize a topic name to its fully-qualified form
pub fn normalize_topic(name: &str) -> Result<String> {
    Ok(TopicName::parse(name)?.to_string())
}

/// One cluster entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InventoryRecord {
    /// Tenant, e.g. `t1`
    Tenant { name: String },

    /// Namespace, e.g. `t1/ns1`
    Namespace { name: String, tenant: String },

    /// Topic, e.g. `persistent://t1/ns1/topicA`; zero partitions means non-partitioned
    Topic {
        name: String,
        namespace: String,
        partitions: u32,
    },
}

impl InventoryRecord {
    pub fn tenant(name: impl Into<String>) -> Self {
        InventoryRecord::Tenant { name: name.into() }
    }

    /// Namespace record from `tenant/namespace`
    pub fn namespace(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let tenant = match name.split_once('/') {
            Some((tenant, ns)) if !tenant.is_empty() && !ns.is_empty() && !ns.contains('/') => {
                tenant.to_string()
            }
            _ => {
                return Err(Error::Config(format!(
                    "Namespace must be tenant/namespace: {}",
                    name
                )))
            }
        };
        Ok(InventoryRecord::Namespace { name, tenant })
    }

    /// Topic record; bare names are normalized
    pub fn topic(name: &str, partitions: u32) -> Result<Self> {
        let parsed = TopicName::parse(name)?;
        Ok(InventoryRecord::Topic {
            namespace: parsed.namespace_path(),
            name: parsed.to_string(),
            partitions,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            InventoryRecord::Tenant { name }
            | InventoryRecord::Namespace { name, .. }
            | InventoryRecord::Topic { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InventoryRecord::Tenant { .. } => "tenant",
            InventoryRecord::Namespace { .. } => "namespace",
            InventoryRecord::Topic { .. } => "topic",
        }
    }
}

/// Ordered inventory: tenants, then namespaces, then topics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Records bucketed by kind, each bucket in insertion order
    buckets: [Vec<InventoryRecord>; 3],
    seen: HashSet<(u8, String)>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records in any order; output is parent-before-child
    pub fn from_records(records: Vec<InventoryRecord>) -> Self {
        let mut inventory = Self::new();
        for record in records {
            inventory.push(record);
        }
        inventory
    }

    /// Add a record, keeping the parent-before-child order stable.
    /// A record with a name already present is ignored.
    pub fn push(&mut self, record: InventoryRecord) {
        let level = rank(&record);
        if !self.seen.insert((level, record.name().to_string())) {
            return;
        }
        self.buckets[usize::from(level)].push(record);
    }

    /// Records in restore order
    pub fn records(&self) -> impl Iterator<Item = &InventoryRecord> {
        self.buckets.iter().flatten()
    }

    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.buckets[0].iter().map(InventoryRecord::name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.buckets[1].iter().map(InventoryRecord::name)
    }

    /// Topics with their partition counts
    pub fn topics(&self) -> impl Iterator<Item = (&str, u32)> {
        self.buckets[2].iter().filter_map(|r| match r {
            InventoryRecord::Topic {
                name, partitions, ..
            } => Some((name.as_str(), *partitions)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tenant, namespace and topic counts
    pub fn counts(&self) -> InventoryCounts {
        InventoryCounts {
            tenants: self.tenants().count(),
            namespaces: self.namespaces().count(),
            topics: self.topics().count(),
        }
    }

    /// Serialize as JSON lines
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parse JSON lines; `key` names the source in errors
    pub fn from_jsonl(key: &str, data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|e| Error::Format {
            key: key.to_string(),
            line: 0,
            message: e.to_string(),
        })?;

        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: InventoryRecord =
                serde_json::from_str(line).map_err(|e| Error::Format {
                    key: key.to_string(),
                    line: i + 1,
                    message: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(Self::from_records(records))
    }
}

fn rank(record: &InventoryRecord) -> u8 {
    match record {
        InventoryRecord::Tenant { .. } => 0,
        InventoryRecord::Namespace { .. } => 1,
        InventoryRecord::Topic { .. } => 2,
    }
}

/// Per-kind inventory counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCounts {
    pub tenants: usize,
    pub namespaces: usize,
    pub topics: usize,
}
