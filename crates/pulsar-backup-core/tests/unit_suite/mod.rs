//! Scenario tests for pulsar-backup-core.

pub mod capture;
pub mod helpers;
pub mod replay;
pub mod restore;
