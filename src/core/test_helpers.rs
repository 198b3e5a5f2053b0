//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::error::ResolveError;
use crate::core::ledger::MemoryRuleTable;
use crate::core::resolve::{Mode, RouteResolver, StaticEnvironment};
use crate::core::rule::DeviceRef;
use crate::core::sync::RuleSynchronizer;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("COMITUP_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("COMITUP_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

pub fn dev(name: &str) -> DeviceRef {
    DeviceRef::new(name).unwrap()
}

/// Link `wlan0`, access point `uap0`, and the given route and mode.
pub fn test_environment(route: Option<&str>, mode: Mode) -> StaticEnvironment {
    StaticEnvironment::new(dev("wlan0"), dev("uap0"), route.map(dev), mode)
}

/// Synchronizer over an empty simulated rule table.
pub fn memory_synchronizer(env: &StaticEnvironment) -> RuleSynchronizer<MemoryRuleTable> {
    RuleSynchronizer::new(MemoryRuleTable::new(), env.clone(), env.clone(), env.clone())
}

/// Route resolver that always fails
pub struct BrokenRouteTable;

impl RouteResolver for BrokenRouteTable {
    fn default_route_device(&self) -> Result<Option<DeviceRef>, ResolveError> {
        Err(ResolveError::MalformedRouteTable("garbage".to_string()))
    }
}

/// Default route on a name the kernel allows but iptables arguments must not carry
pub struct UnusableRouteTable;

impl RouteResolver for UnusableRouteTable {
    fn default_route_device(&self) -> Result<Option<DeviceRef>, ResolveError> {
        DeviceRef::new("eth0@if3").map(Some)
    }
}
