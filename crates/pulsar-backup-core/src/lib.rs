//! Pulsar Backup Core Library
//!
//! This crate captures the tenants, namespaces, topics and messages of an
//! Apache Pulsar cluster into a capture set, and restores and replays a
//! capture set into a (possibly different) cluster.

pub mod capture;
pub mod cluster;
pub mod config;
pub mod cursor;
pub mod enumerate;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod manifest;
pub mod record;
pub mod report;
pub mod restore;
pub mod retry;
pub mod shutdown;
pub mod storage;

pub use capture::CaptureEngine;
pub use cluster::{
    ClusterAdmin, CreateOutcome, InMemoryCluster, MessagingClient, OutgoingMessage,
    ReceivedMessage, TopicPublisher, TopicReader,
};
pub use config::{
    ClusterAuth, ClusterConfig, Config, OAuth2Config, Operation, ReplayOptions, RestoreOptions,
};
pub use cursor::{ReplayCursor, ShardProgress};
pub use enumerate::{Enumeration, InventoryEnumerator};
pub use error::{ClusterError, Error, Result, StorageError};
pub use filter::TopicFilter;
pub use inventory::{Inventory, InventoryCounts, InventoryRecord, TopicName};
pub use manifest::{CaptureManifest, CaptureState, TopicCapture, TopicStatus};
pub use record::CapturedMessage;
pub use report::{
    CaptureReport, InventoryRestoreReport, PurgeReport, ReplayReport, RestoreReport,
};
pub use restore::{InventoryRestorer, ReplayEngine, ResourcePurger};
pub use retry::RetryPolicy;
