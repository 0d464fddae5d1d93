//! Scenario test suite entry point.
//!
//! These tests drive the capture, restore and replay engines end to end
//! against the in-memory cluster and storage backends. They run quickly and
//! don't require a broker.
//!
//! Run with: `cargo test --test unit_tests`

mod unit_suite;
