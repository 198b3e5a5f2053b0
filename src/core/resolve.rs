//! Collaborator interfaces: device naming, default route, operating mode
//!
//! The synchronizer queries these on every transition and never caches the
//! answers. All three are synchronous, read-only and safe to call without
//! coordination.
//!
//! Production implementations read sysfs and procfs:
//! - [`SysfsDeviceResolver`] / [`SysfsModeOracle`]: wireless interfaces under `/sys/class/net`
//! - [`ProcRouteResolver`]: `/proc/net/route`
//!
//! [`StaticEnvironment`] answers with fixed values (dry-runs, tests).

use crate::core::error::ResolveError;
use crate::core::rule::DeviceRef;
use std::path::PathBuf;
use tracing::warn;

/// Logical device roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DeviceRole {
    #[strum(serialize = "link")]
    Link,
    #[strum(serialize = "access-point")]
    AccessPoint,
}

/// Operating mode
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One wireless device alternates between hotspot and client
    #[default]
    #[strum(serialize = "single")]
    Single,
    /// Separate access-point and link devices; traffic is forwarded (NAT)
    #[strum(serialize = "router")]
    #[serde(rename = "router")]
    MultiAppliance,
}

pub trait DeviceResolver: Send + Sync {
    fn device(&self, role: DeviceRole) -> Result<DeviceRef, ResolveError>;
}

pub trait RouteResolver: Send + Sync {
    /// Interface carrying the default route, if any.
    fn default_route_device(&self) -> Result<Option<DeviceRef>, ResolveError>;
}

pub trait ModeOracle: Send + Sync {
    fn mode(&self) -> Mode;
}

/// Router mode requires the feature flag and at least two wireless devices.
fn mode_for(enable_appliance_mode: bool, wireless_count: usize) -> Mode {
    if enable_appliance_mode && wireless_count > 1 {
        Mode::MultiAppliance
    } else {
        Mode::Single
    }
}

/// Mode derived from configuration and the wireless devices present
#[derive(Debug, Clone)]
pub struct SysfsModeOracle {
    pub enable_appliance_mode: bool,
    pub sysfs_root: PathBuf,
}

impl SysfsModeOracle {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            enable_appliance_mode: config.enable_appliance_mode,
            sysfs_root: config.sysfs_root.clone(),
        }
    }
}

impl ModeOracle for SysfsModeOracle {
    fn mode(&self) -> Mode {
        if !self.enable_appliance_mode {
            return Mode::Single;
        }
        match crate::utils::wireless_interfaces(&self.sysfs_root) {
            Ok(devices) => mode_for(true, devices.len()),
            Err(e) => {
                warn!("Cannot enumerate wireless interfaces, assuming single mode: {e}");
                Mode::Single
            }
        }
    }
}

/// Assigns roles to wireless interfaces in name order.
///
/// The access point is the first wireless device. The link is the second one
/// in router mode and the same device otherwise. Explicit overrides win.
#[derive(Debug, Clone)]
pub struct SysfsDeviceResolver {
    pub enable_appliance_mode: bool,
    pub ap_override: Option<String>,
    pub link_override: Option<String>,
    pub sysfs_root: PathBuf,
}

impl SysfsDeviceResolver {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            enable_appliance_mode: config.enable_appliance_mode,
            ap_override: config.ap_device.clone(),
            link_override: config.link_device.clone(),
            sysfs_root: config.sysfs_root.clone(),
        }
    }
}

impl DeviceResolver for SysfsDeviceResolver {
    fn device(&self, role: DeviceRole) -> Result<DeviceRef, ResolveError> {
        let pinned = match role {
            DeviceRole::AccessPoint => &self.ap_override,
            DeviceRole::Link => &self.link_override,
        };
        if let Some(name) = pinned {
            return DeviceRef::new(name.as_str());
        }

        let devices = crate::utils::wireless_interfaces(&self.sysfs_root)?;
        let index = match (role, mode_for(self.enable_appliance_mode, devices.len())) {
            (DeviceRole::Link, Mode::MultiAppliance) => 1,
            _ => 0,
        };
        let name = devices
            .into_iter()
            .nth(index)
            .ok_or(ResolveError::NoWirelessDevice)?;
        DeviceRef::new(name)
    }
}

const RTF_UP: u32 = 0x0001;

/// Reads the default route from the kernel routing table
#[derive(Debug, Clone)]
pub struct ProcRouteResolver {
    pub path: PathBuf,
}

impl Default for ProcRouteResolver {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/net/route"),
        }
    }
}

impl ProcRouteResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RouteResolver for ProcRouteResolver {
    fn default_route_device(&self) -> Result<Option<DeviceRef>, ResolveError> {
        let table = std::fs::read_to_string(&self.path)?;
        parse_default_route(&table)
    }
}

/// Picks the up default route (zero destination and mask) with the lowest metric.
pub fn parse_default_route(table: &str) -> Result<Option<DeviceRef>, ResolveError> {
    let mut best: Option<(u32, &str)> = None;

    for line in table.lines().skip(1).filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [iface, destination, _gateway, flags, _refcnt, _use, metric, mask, ..] =
            fields.as_slice()
        else {
            return Err(ResolveError::MalformedRouteTable(line.to_string()));
        };

        let flags = u32::from_str_radix(flags, 16)
            .map_err(|_| ResolveError::MalformedRouteTable(line.to_string()))?;
        let metric: u32 = metric
            .parse()
            .map_err(|_| ResolveError::MalformedRouteTable(line.to_string()))?;

        let is_default = *destination == "00000000" && *mask == "00000000";
        if is_default && flags & RTF_UP != 0 && best.is_none_or(|(m, _)| metric < m) {
            best = Some((metric, *iface));
        }
    }

    best.map(|(_, iface)| DeviceRef::new(iface)).transpose()
}

/// Fixed answers for all three collaborators
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    pub link: Option<DeviceRef>,
    pub ap: Option<DeviceRef>,
    pub route: Option<DeviceRef>,
    pub mode: Mode,
}

impl StaticEnvironment {
    pub fn new(link: DeviceRef, ap: DeviceRef, route: Option<DeviceRef>, mode: Mode) -> Self {
        Self {
            link: Some(link),
            ap: Some(ap),
            route,
            mode,
        }
    }
}

impl DeviceResolver for StaticEnvironment {
    fn device(&self, role: DeviceRole) -> Result<DeviceRef, ResolveError> {
        let device = match role {
            DeviceRole::Link => &self.link,
            DeviceRole::AccessPoint => &self.ap,
        };
        device.clone().ok_or(ResolveError::NoWirelessDevice)
    }
}

impl RouteResolver for StaticEnvironment {
    fn default_route_device(&self) -> Result<Option<DeviceRef>, ResolveError> {
        Ok(self.route.clone())
    }
}

impl ModeOracle for StaticEnvironment {
    fn mode(&self) -> Mode {
        self.mode
    }
}
