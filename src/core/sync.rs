//! Rule synchronizer
//!
//! Turns `(state, action)` transitions from the connection state machine into
//! ordered rule-table mutations. The kernel table is the only state: nothing is
//! remembered between calls, and every install is preceded by the matching
//! teardown so that re-delivering a transition converges to the same table.
//!
//! # Transitions
//!
//! | Event | Commands |
//! |-------|----------|
//! | `HOTSPOT start` | `END_HOTSPOT`, `START_HOTSPOT`, then `APPLIANCE_CLEAR` in router mode |
//! | `CONNECTED start` | `END_HOTSPOT`; in router mode `APPLIANCE_CLEAR`, `APPLIANCE_FORWARDING` and the default-route masquerade |
//! | anything else | nothing |

use crate::core::catalog::{self, RuleSetName};
use crate::core::error::{
    CommandFailure, IptablesErrorKind, IptablesErrorPattern, ResolveError, SyncError,
};
use crate::core::gateway::{ApplyStatus, CommandExecutor, RuleTableGateway};
use crate::core::resolve::{
    DeviceResolver, DeviceRole, Mode, ModeOracle, ProcRouteResolver, RouteResolver,
    SysfsDeviceResolver, SysfsModeOracle,
};
use crate::core::rule::{Devices, Step};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Connection state reported by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum OperatingState {
    Hotspot,
    Connected,
    /// Any state that needs no rule changes
    #[strum(serialize = "OTHER")]
    Other,
}

impl OperatingState {
    /// Parses a state name; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or(Self::Other)
    }
}

/// Phase of a state reported by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Action {
    Start,
    Stop,
    #[strum(serialize = "other")]
    Other,
}

impl Action {
    /// Parses an action name; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or(Self::Other)
    }
}

/// Whether a transition results in any rule-table commands
pub fn changes_rules(state: OperatingState, action: Action) -> bool {
    action == Action::Start && matches!(state, OperatingState::Hotspot | OperatingState::Connected)
}

/// Keeps the kernel rule table in line with the device role.
pub struct RuleSynchronizer<G> {
    gateway: G,
    devices: Box<dyn DeviceResolver>,
    routes: Box<dyn RouteResolver>,
    mode: Box<dyn ModeOracle>,
    // Whole-table lock: interleaved teardown/install sequences corrupt chains
    table_lock: Mutex<()>,
}

impl RuleSynchronizer<CommandExecutor> {
    /// Synchronizer for the live system: iptables, sysfs and `/proc/net/route`.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            CommandExecutor::from_config(config),
            SysfsDeviceResolver::from_config(config),
            ProcRouteResolver::new(&config.route_table),
            SysfsModeOracle::from_config(config),
        )
    }
}

impl<G: RuleTableGateway> RuleSynchronizer<G> {
    pub fn new(
        gateway: G,
        devices: impl DeviceResolver + 'static,
        routes: impl RouteResolver + 'static,
        mode: impl ModeOracle + 'static,
    ) -> Self {
        Self {
            gateway,
            devices: Box::new(devices),
            routes: Box::new(routes),
            mode: Box::new(mode),
            table_lock: Mutex::new(()),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Resolves the link and access-point devices for one transition.
    pub fn resolve_devices(&self) -> Result<Devices, SyncError> {
        let resolve = |role| {
            self.devices
                .device(role)
                .map_err(|source| SyncError::DeviceResolutionFailed { role, source })
        };

        Ok(Devices {
            link: resolve(DeviceRole::Link)?,
            ap: resolve(DeviceRole::AccessPoint)?,
        })
    }

    /// Applies the rule changes for a state transition.
    ///
    /// Only `(HOTSPOT, start)` and `(CONNECTED, start)` touch the rule table.
    /// Device resolution failures abort before any command is issued. Failed
    /// install commands do not stop the sequence; they are reported together
    /// once it has finished.
    pub async fn on_transition(
        &self,
        state: OperatingState,
        action: Action,
    ) -> Result<(), SyncError> {
        let _guard = self.table_lock.lock().await;

        let failures = match (state, action) {
            (OperatingState::Hotspot, Action::Start) => {
                let devices = self.resolve_devices()?;
                let mode = self.mode.mode();
                info!("Running iptables commands for HOTSPOT ({mode} mode)");
                self.enter_hotspot(&devices, mode).await
            }
            (OperatingState::Connected, Action::Start) => {
                let devices = self.resolve_devices()?;
                let mode = self.mode.mode();
                info!("Running iptables commands for CONNECTED ({mode} mode)");
                self.enter_connected(&devices, mode).await
            }
            _ => {
                debug!("No iptables changes for {state} {action}");
                return Ok(());
            }
        };

        info!("Done with iptables commands for {state}");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ExternalCommandFailed { failures })
        }
    }

    /// Applies a single rule set under the table lock.
    ///
    /// Returns the install commands that failed; best-effort failures are
    /// not included.
    pub async fn apply_rule_set(&self, name: RuleSetName, devices: &Devices) -> Vec<CommandFailure> {
        let _guard = self.table_lock.lock().await;
        let mut failures = Vec::new();
        self.run_set(name, devices, &mut failures).await;
        failures
    }

    async fn enter_hotspot(&self, devices: &Devices, mode: Mode) -> Vec<CommandFailure> {
        let mut failures = Vec::new();

        self.run_set(RuleSetName::EndHotspot, devices, &mut failures)
            .await;
        self.run_set(RuleSetName::StartHotspot, devices, &mut failures)
            .await;

        if mode == Mode::MultiAppliance {
            self.run_set(RuleSetName::ApplianceClear, devices, &mut failures)
                .await;
        }

        failures
    }

    async fn enter_connected(&self, devices: &Devices, mode: Mode) -> Vec<CommandFailure> {
        let mut failures = Vec::new();

        self.run_set(RuleSetName::EndHotspot, devices, &mut failures)
            .await;

        if mode == Mode::Single {
            return failures;
        }

        self.run_set(RuleSetName::ApplianceClear, devices, &mut failures)
            .await;
        self.run_set(RuleSetName::ApplianceForwarding, devices, &mut failures)
            .await;

        let route = match self.routes.default_route_device() {
            Ok(route) => route,
            Err(e) if route_failure_is_visible(&e) => {
                warn!("Default route device is unusable, no extra masquerade rule: {e}");
                None
            }
            Err(e) => {
                debug!("Default route lookup failed, treating as absent: {e}");
                None
            }
        };

        match route {
            Some(route) if route != devices.ap => {
                debug!("Masquerading default-route device {route}");
                self.run_step(&catalog::extra_masquerade(route), &mut failures)
                    .await;
            }
            Some(route) => debug!("Default route is on the access point ({route}), no extra rule"),
            None => debug!("No default route, no extra masquerade rule"),
        }

        failures
    }

    async fn run_set(
        &self,
        name: RuleSetName,
        devices: &Devices,
        failures: &mut Vec<CommandFailure>,
    ) {
        debug!("Applying {name}");
        for step in name.resolve(devices) {
            self.run_step(&step, failures).await;
        }
    }

    async fn run_step(&self, step: &Step, failures: &mut Vec<CommandFailure>) {
        let status = self.gateway.apply(&step.command).await;
        if status.is_success() {
            return;
        }

        if step.best_effort {
            if teardown_failure_is_expected(&status) {
                debug!("Teardown skipped: {} ({status})", step.command);
            } else {
                warn!("Teardown failed: {} ({status})", step.command);
            }
            return;
        }

        match status.stderr().map(IptablesErrorPattern::match_error) {
            Some(translation) => {
                warn!(
                    "Command failed: {} ({status}) - {}",
                    step.command, translation.user_message
                );
                for suggestion in &translation.suggestions {
                    debug!("  hint: {suggestion}");
                }
            }
            None => warn!("Command failed: {} ({status})", step.command),
        }

        failures.push(CommandFailure {
            command: step.command.to_string(),
            status,
        });
    }
}

/// Teardown of rules that were never installed fails with "not found"; any
/// other teardown failure (permissions, lock, chain in use) is worth a warning.
pub fn teardown_failure_is_expected(status: &ApplyStatus) -> bool {
    match status {
        ApplyStatus::Rejected { stderr, .. } => {
            IptablesErrorPattern::match_error(stderr).kind == IptablesErrorKind::Missing
        }
        _ => false,
    }
}

/// A route that exists but names an interface we refuse to pass to iptables
/// differs from "no route" and is logged at warn.
pub fn route_failure_is_visible(error: &ResolveError) -> bool {
    matches!(error, ResolveError::InvalidDevice { .. })
}
