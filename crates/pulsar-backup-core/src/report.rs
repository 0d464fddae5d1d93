//! Run summaries for capture, restore, replay and purge.

use serde::Serialize;
use std::fmt;

use crate::inventory::InventoryCounts;
use crate::manifest::TopicStatus;

/// A named item that did not make it, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub name: String,
    pub error: String,
}

impl ItemFailure {
    pub fn new(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            error: error.to_string(),
        }
    }
}

/// Per-topic outcome of a capture
#[derive(Debug, Clone, Serialize)]
pub struct TopicCaptureSummary {
    pub topic: String,
    pub status: TopicStatus,
    pub messages: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a capture run
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub capture_id: String,
    pub inventory: InventoryCounts,
    pub warnings: Vec<String>,
    pub topics: Vec<TopicCaptureSummary>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl CaptureReport {
    pub fn total_messages(&self) -> u64 {
        self.topics.iter().map(|t| t.messages).sum()
    }

    pub fn failed_topics(&self) -> impl Iterator<Item = &TopicCaptureSummary> {
        self.topics
            .iter()
            .filter(|t| t.status == TopicStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.cancelled || self.failed_topics().next().is_some()
    }
}

impl fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<_> = self.failed_topics().collect();
        writeln!(f, "=== Capture {} ===", self.capture_id)?;
        writeln!(f, "Duration: {:.2}s", self.duration_ms as f64 / 1000.0)?;
        writeln!(
            f,
            "Inventory: {} tenants, {} namespaces, {} topics",
            self.inventory.tenants, self.inventory.namespaces, self.inventory.topics
        )?;
        writeln!(
            f,
            "Topics: {} captured, {} failed",
            self.topics.len() - failed.len(),
            failed.len()
        )?;
        writeln!(f, "Messages: {}", self.total_messages())?;
        if self.cancelled {
            writeln!(f, "Run was cancelled before all topics finished")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning)?;
        }
        for topic in failed {
            writeln!(
                f,
                "  failed: {} ({})",
                topic.topic,
                topic.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// Summary of an inventory restore
#[derive(Debug, Clone, Default, Serialize)]
pub struct InventoryRestoreReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub conflicts: Vec<ItemFailure>,
    pub failed: Vec<ItemFailure>,
}

impl InventoryRestoreReport {
    pub fn has_failures(&self) -> bool {
        !self.conflicts.is_empty() || !self.failed.is_empty()
    }
}

impl fmt::Display for InventoryRestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Inventory Restore ===")?;
        writeln!(f, "Created: {}", self.created.len())?;
        writeln!(f, "Already present: {}", self.existing.len())?;
        writeln!(f, "Conflicts: {}", self.conflicts.len())?;
        writeln!(f, "Failed: {}", self.failed.len())?;
        for conflict in &self.conflicts {
            writeln!(f, "  conflict: {} ({})", conflict.name, conflict.error)?;
        }
        for failure in &self.failed {
            writeln!(f, "  failed: {} ({})", failure.name, failure.error)?;
        }
        Ok(())
    }
}

/// Per-topic outcome of a replay
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicReplaySummary {
    pub topic: String,
    pub replayed: u64,
    /// Already replayed by an earlier run
    pub skipped: u64,
    pub failed: u64,
    /// Ids of failed messages; corrupt records are named `line <n>`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TopicReplaySummary {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

/// Totals across replayed topics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayTotals {
    pub replayed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Summary of a replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub capture_id: String,
    pub cursor: String,
    pub topics: Vec<TopicReplaySummary>,
    /// Topics not replayed because their capture failed
    pub skipped_topics: Vec<String>,
    pub totals: ReplayTotals,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ReplayReport {
    pub(crate) fn compute_totals(&mut self) {
        self.totals = self.topics.iter().fold(ReplayTotals::default(), |acc, t| {
            ReplayTotals {
                replayed: acc.replayed + t.replayed,
                skipped: acc.skipped + t.skipped,
                failed: acc.failed + t.failed,
            }
        });
    }

    pub fn topic(&self, topic: &str) -> Option<&TopicReplaySummary> {
        self.topics.iter().find(|t| t.topic == topic)
    }

    pub fn has_failures(&self) -> bool {
        self.cancelled
            || self.totals.failed > 0
            || !self.skipped_topics.is_empty()
            || self.topics.iter().any(|t| t.error.is_some())
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== Replay {} (cursor {}) ===",
            self.capture_id, self.cursor
        )?;
        writeln!(f, "Duration: {:.2}s", self.duration_ms as f64 / 1000.0)?;
        writeln!(
            f,
            "Messages: {} replayed, {} skipped, {} failed",
            self.totals.replayed, self.totals.skipped, self.totals.failed
        )?;
        if self.cancelled {
            writeln!(f, "Run was cancelled before all topics finished")?;
        }
        for topic in &self.topics {
            writeln!(
                f,
                "  {}: replayed={} skipped={} failed={}",
                topic.topic, topic.replayed, topic.skipped, topic.failed
            )?;
            if let Some(error) = &topic.error {
                writeln!(f, "    error: {}", error)?;
            }
            for id in &topic.failed_messages {
                writeln!(f, "    failed: {}", id)?;
            }
        }
        for topic in &self.skipped_topics {
            writeln!(f, "  skipped (capture failed): {}", topic)?;
        }
        Ok(())
    }
}

/// Inventory restore followed, unless skipped, by replay
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub inventory: InventoryRestoreReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayReport>,
}

impl RestoreReport {
    pub fn has_failures(&self) -> bool {
        self.inventory.has_failures()
            || self.replay.as_ref().is_some_and(ReplayReport::has_failures)
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inventory)?;
        if let Some(replay) = &self.replay {
            writeln!(f)?;
            write!(f, "{}", replay)?;
        }
        Ok(())
    }
}

/// Summary of a purge
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl PurgeReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Purge ===")?;
        writeln!(f, "Deleted: {}", self.deleted.len())?;
        writeln!(f, "Failed: {}", self.failed.len())?;
        for failure in &self.failed {
            writeln!(f, "  failed: {} ({})", failure.name, failure.error)?;
        }
        Ok(())
    }
}
