//! Core rule synchronization functionality
//!
//! This module contains the types and logic for keeping the kernel packet
//! filter in line with the device's role. It provides:
//!
//! - [`rule`]: Typed iptables commands and device-name placeholders
//! - [`catalog`]: The fixed rule sets and the default-route masquerade rule
//! - [`gateway`]: The command-execution seam and its process-backed implementation
//! - [`ledger`]: An in-memory rule table for dry-runs and tests
//! - [`resolve`]: Device, route and mode collaborators
//! - [`sync`]: The transition-driven synchronizer
//! - [`error`]: Error types for synchronization

pub mod catalog;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod resolve;
pub mod rule;
pub mod sync;

#[cfg(test)]
pub mod test_helpers;
