//! Typed iptables command builder
//!
//! Rule-table mutations are expressed as data rather than interpolated strings.
//! Every command is generic over its interface type `I`:
//!
//! - Templates in the catalog use [`Placeholder`] (`Link` / `Ap`)
//! - Concrete commands use [`DeviceRef`] once the devices are resolved
//!
//! Rendering to an argument vector happens only at the gateway boundary, and the
//! arguments are passed to `iptables` directly (no shell), so a device name can
//! never smuggle extra arguments into a command.

use crate::core::error::ResolveError;
use std::fmt;

/// Dedicated filter chain hooked into the access-point output path
pub const HOTSPOT_CHAIN: &str = "COMITUP-OUT";

/// Dedicated NAT chain hooked into postrouting
pub const FORWARD_CHAIN: &str = "COMITUP-FWD";

pub const OUTPUT: &str = "OUTPUT";
pub const POSTROUTING: &str = "POSTROUTING";

/// Validated network interface name.
///
/// Never cached across transitions, since interfaces can come and go.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceRef(String);

impl DeviceRef {
    /// Validates `name` as a kernel interface name.
    pub fn new(name: impl Into<String>) -> Result<Self, ResolveError> {
        let name = name.into();
        match crate::validators::validate_interface(&name) {
            Ok(()) => Ok(Self(name)),
            Err(reason) => Err(ResolveError::InvalidDevice { name, reason }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Named device slot in a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Device carrying the upstream link (`{link}`)
    Link,
    /// Access-point device (`{ap}`)
    Ap,
}

/// Resolved devices for one transition.
///
/// Both fields are required by construction, so a template can never be
/// rendered with a missing placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Devices {
    pub link: DeviceRef,
    pub ap: DeviceRef,
}

impl Devices {
    pub fn get(&self, placeholder: Placeholder) -> &DeviceRef {
        match placeholder {
            Placeholder::Link => &self.link,
            Placeholder::Ap => &self.ap,
        }
    }
}

/// iptables table selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Default table, rendered without `-t`
    Filter,
    Nat,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

/// ICMP types matched by the hotspot isolation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    DestinationUnreachable,
    PortUnreachable,
}

impl IcmpType {
    pub fn name(self) -> &'static str {
        match self {
            IcmpType::DestinationUnreachable => "destination-unreachable",
            IcmpType::PortUnreachable => "port-unreachable",
        }
    }
}

/// Rule verdict (`-j`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Drop,
    Return,
    Masquerade,
    /// Jump into a user-defined chain
    Jump(&'static str),
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Drop => "DROP",
            Target::Return => "RETURN",
            Target::Masquerade => "MASQUERADE",
            Target::Jump(chain) => chain,
        }
    }
}

/// Match criteria and verdict of a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec<I> {
    /// `-o <iface>`
    pub out_interface: Option<I>,
    /// `-p icmp --icmp-type <type>`
    pub icmp: Option<IcmpType>,
    pub target: Target,
}

impl<I> RuleSpec<I> {
    pub const fn jump(target: Target) -> Self {
        Self {
            out_interface: None,
            icmp: None,
            target,
        }
    }

    pub const fn out(interface: I, target: Target) -> Self {
        Self {
            out_interface: Some(interface),
            icmp: None,
            target,
        }
    }

    pub const fn icmp(icmp: IcmpType, target: Target) -> Self {
        Self {
            out_interface: None,
            icmp: Some(icmp),
            target,
        }
    }

    pub fn map<J>(&self, f: impl Fn(&I) -> J) -> RuleSpec<J> {
        RuleSpec {
            out_interface: self.out_interface.as_ref().map(f),
            icmp: self.icmp,
            target: self.target,
        }
    }
}

impl<I: AsRef<str>> RuleSpec<I> {
    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(iface) = &self.out_interface {
            args.push("-o".to_string());
            args.push(iface.as_ref().to_string());
        }
        if let Some(icmp) = self.icmp {
            args.extend(["-p", "icmp", "--icmp-type", icmp.name()].map(String::from));
        }
        args.push("-j".to_string());
        args.push(self.target.name().to_string());
    }
}

/// Chain-level operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<I> {
    /// `-N`
    NewChain(&'static str),
    /// `-F`
    FlushChain(&'static str),
    /// `-X`
    DeleteChain(&'static str),
    /// `-A`
    Append(&'static str, RuleSpec<I>),
    /// `-I` (head of chain)
    Insert(&'static str, RuleSpec<I>),
    /// `-D`
    Delete(&'static str, RuleSpec<I>),
}

impl<I> Operation<I> {
    pub fn chain(&self) -> &'static str {
        match self {
            Operation::NewChain(chain)
            | Operation::FlushChain(chain)
            | Operation::DeleteChain(chain)
            | Operation::Append(chain, _)
            | Operation::Insert(chain, _)
            | Operation::Delete(chain, _) => *chain,
        }
    }

    pub fn map<J>(&self, f: impl Fn(&I) -> J) -> Operation<J> {
        match self {
            Operation::NewChain(chain) => Operation::NewChain(*chain),
            Operation::FlushChain(chain) => Operation::FlushChain(*chain),
            Operation::DeleteChain(chain) => Operation::DeleteChain(*chain),
            Operation::Append(chain, rule) => Operation::Append(*chain, rule.map(f)),
            Operation::Insert(chain, rule) => Operation::Insert(*chain, rule.map(f)),
            Operation::Delete(chain, rule) => Operation::Delete(*chain, rule.map(f)),
        }
    }
}

/// A single rule-table mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCommand<I = DeviceRef> {
    Iptables { table: Table, op: Operation<I> },
    /// Sets `net.ipv4.ip_forward = 1`
    EnableIpv4Forwarding,
}

impl<I> RuleCommand<I> {
    pub const fn filter(op: Operation<I>) -> Self {
        RuleCommand::Iptables {
            table: Table::Filter,
            op,
        }
    }

    pub const fn nat(op: Operation<I>) -> Self {
        RuleCommand::Iptables {
            table: Table::Nat,
            op,
        }
    }

    pub fn map<J>(&self, f: impl Fn(&I) -> J) -> RuleCommand<J> {
        match self {
            RuleCommand::Iptables { table, op } => RuleCommand::Iptables {
                table: *table,
                op: op.map(f),
            },
            RuleCommand::EnableIpv4Forwarding => RuleCommand::EnableIpv4Forwarding,
        }
    }
}

impl<I: AsRef<str>> RuleCommand<I> {
    /// Arguments passed to `iptables`, or `None` for non-iptables commands.
    pub fn iptables_args(&self) -> Option<Vec<String>> {
        let RuleCommand::Iptables { table, op } = self else {
            return None;
        };

        // -w: wait for the xtables lock instead of failing
        let mut args = vec!["-w".to_string()];
        if *table != Table::Filter {
            args.push("-t".to_string());
            args.push(table.name().to_string());
        }

        let (flag, chain, rule) = match op {
            Operation::NewChain(chain) => ("-N", chain, None),
            Operation::FlushChain(chain) => ("-F", chain, None),
            Operation::DeleteChain(chain) => ("-X", chain, None),
            Operation::Append(chain, rule) => ("-A", chain, Some(rule)),
            Operation::Insert(chain, rule) => ("-I", chain, Some(rule)),
            Operation::Delete(chain, rule) => ("-D", chain, Some(rule)),
        };
        args.push(flag.to_string());
        args.push((*chain).to_string());
        if let Some(rule) = rule {
            rule.push_args(&mut args);
        }

        Some(args)
    }
}

impl<I: AsRef<str>> fmt::Display for RuleCommand<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.iptables_args() {
            Some(args) => write!(f, "iptables {}", args.join(" ")),
            None => f.write_str("sysctl -w net.ipv4.ip_forward=1"),
        }
    }
}

impl AsRef<str> for Placeholder {
    fn as_ref(&self) -> &str {
        match self {
            Placeholder::Link => "{link}",
            Placeholder::Ap => "{ap}",
        }
    }
}

/// One command in a rule set, plus whether its failure is expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<I = DeviceRef> {
    pub command: RuleCommand<I>,
    /// Teardown commands tolerate "target not found"
    pub best_effort: bool,
}

/// Template step as stored in the catalog
pub type Template = Step<Placeholder>;

impl<I> Step<I> {
    pub const fn install(command: RuleCommand<I>) -> Self {
        Self {
            command,
            best_effort: false,
        }
    }

    pub const fn teardown(command: RuleCommand<I>) -> Self {
        Self {
            command,
            best_effort: true,
        }
    }
}

impl Template {
    /// Substitutes placeholders with the resolved devices.
    pub fn resolve(&self, devices: &Devices) -> Step {
        Step {
            command: self.command.map(|p| devices.get(*p).clone()),
            best_effort: self.best_effort,
        }
    }
}
