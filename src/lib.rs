//! comitup-iptmgr - packet-filter rules for a Wi-Fi provisioning appliance
//!
//! Keeps the kernel iptables state in line with the device's role as the
//! connection state machine moves between hotspot and connected.
//!
//! # Architecture
//!
//! - [`core`] - Rule catalog, synchronizer, command gateway and resolvers
//! - [`audit`] - JSON-lines audit log of rule-table changes
//! - [`validators`] - Validation of values that reach a command line
//! - [`config`] - Configuration file loading
//! - [`elevation`] - Running commands with root privileges
//! - [`utils`] - State directory and sysfs interface discovery
//!
//! # Example
//!
//! ```no_run
//! use comitup_iptmgr::config::Config;
//! use comitup_iptmgr::core::sync::{Action, OperatingState, RuleSynchronizer};
//!
//! # async fn example() -> Result<(), comitup_iptmgr::Error> {
//! let sync = RuleSynchronizer::from_config(&Config::default());
//! sync.on_transition(OperatingState::Hotspot, Action::Start).await?;
//! # Ok(())
//! # }
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result, SyncError};
pub use core::gateway::{ApplyStatus, CommandExecutor, RuleTableGateway};
pub use core::sync::{Action, OperatingState, RuleSynchronizer};
