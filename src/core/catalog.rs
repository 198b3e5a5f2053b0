//! Rule catalog: the four named rule sets and the conditional masquerade rule
//!
//! Rule sets are `static` slices of [`Template`]s and are never mutated. The
//! rendered commands match, argument for argument, what other tooling on the
//! device expects to find in the kernel tables.

use crate::core::rule::{
    DeviceRef, Devices, FORWARD_CHAIN, HOTSPOT_CHAIN, IcmpType, OUTPUT, Operation, POSTROUTING,
    Placeholder, RuleCommand, RuleSpec, Step, Target, Template,
};

/// Name of a rule set in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleSetName {
    StartHotspot,
    EndHotspot,
    ApplianceForwarding,
    ApplianceClear,
}

impl RuleSetName {
    pub fn templates(self) -> &'static [Template] {
        match self {
            RuleSetName::StartHotspot => START_HOTSPOT,
            RuleSetName::EndHotspot => END_HOTSPOT,
            RuleSetName::ApplianceForwarding => APPLIANCE_FORWARDING,
            RuleSetName::ApplianceClear => APPLIANCE_CLEAR,
        }
    }

    /// Resolves every template of the set against `devices`, preserving order.
    pub fn resolve(self, devices: &Devices) -> Vec<Step> {
        self.templates()
            .iter()
            .map(|template| template.resolve(devices))
            .collect()
    }
}

/// Removes the hotspot isolation chain and its hook (best-effort)
pub static END_HOTSPOT: &[Template] = &[
    Template::teardown(RuleCommand::filter(Operation::Delete(
        OUTPUT,
        RuleSpec::out(Placeholder::Ap, Target::Jump(HOTSPOT_CHAIN)),
    ))),
    Template::teardown(RuleCommand::filter(Operation::FlushChain(HOTSPOT_CHAIN))),
    Template::teardown(RuleCommand::filter(Operation::DeleteChain(HOTSPOT_CHAIN))),
];

/// Drops outbound ICMP unreachables on the access-point interface
pub static START_HOTSPOT: &[Template] = &[
    Template::install(RuleCommand::filter(Operation::NewChain(HOTSPOT_CHAIN))),
    Template::install(RuleCommand::filter(Operation::Append(
        HOTSPOT_CHAIN,
        RuleSpec::icmp(IcmpType::DestinationUnreachable, Target::Drop),
    ))),
    Template::install(RuleCommand::filter(Operation::Append(
        HOTSPOT_CHAIN,
        RuleSpec::icmp(IcmpType::PortUnreachable, Target::Drop),
    ))),
    Template::install(RuleCommand::filter(Operation::Append(
        HOTSPOT_CHAIN,
        RuleSpec::jump(Target::Return),
    ))),
    Template::install(RuleCommand::filter(Operation::Insert(
        OUTPUT,
        RuleSpec::out(Placeholder::Ap, Target::Jump(HOTSPOT_CHAIN)),
    ))),
];

/// Removes the NAT forwarding chain and its postrouting hook (best-effort)
pub static APPLIANCE_CLEAR: &[Template] = &[
    Template::teardown(RuleCommand::nat(Operation::Delete(
        POSTROUTING,
        RuleSpec::jump(Target::Jump(FORWARD_CHAIN)),
    ))),
    Template::teardown(RuleCommand::nat(Operation::FlushChain(FORWARD_CHAIN))),
    Template::teardown(RuleCommand::nat(Operation::DeleteChain(FORWARD_CHAIN))),
];

/// Masquerades traffic leaving the link device and enables forwarding
pub static APPLIANCE_FORWARDING: &[Template] = &[
    Template::install(RuleCommand::nat(Operation::NewChain(FORWARD_CHAIN))),
    Template::install(RuleCommand::nat(Operation::Append(
        FORWARD_CHAIN,
        RuleSpec::out(Placeholder::Link, Target::Masquerade),
    ))),
    Template::install(RuleCommand::nat(Operation::Append(
        FORWARD_CHAIN,
        RuleSpec::jump(Target::Return),
    ))),
    Template::install(RuleCommand::nat(Operation::Append(
        POSTROUTING,
        RuleSpec::jump(Target::Jump(FORWARD_CHAIN)),
    ))),
    Template::install(RuleCommand::EnableIpv4Forwarding),
];

/// Masquerade rule for the default-route device, inserted at the head of
/// the forwarding chain so it precedes the generic link rule.
pub fn extra_masquerade(route: DeviceRef) -> Step {
    Step::install(RuleCommand::nat(Operation::Insert(
        FORWARD_CHAIN,
        RuleSpec::out(route, Target::Masquerade),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn devices() -> Devices {
        Devices {
            link: DeviceRef::new("wlan0").unwrap(),
            ap: DeviceRef::new("uap0").unwrap(),
        }
    }

    fn rendered(name: RuleSetName) -> Vec<String> {
        name.resolve(&devices())
            .iter()
            .map(|step| step.command.to_string())
            .collect()
    }

    #[test]
    fn test_end_hotspot_commands() {
        assert_eq!(
            rendered(RuleSetName::EndHotspot),
            vec![
                "iptables -w -D OUTPUT -o uap0 -j COMITUP-OUT",
                "iptables -w -F COMITUP-OUT",
                "iptables -w -X COMITUP-OUT",
            ]
        );
    }

    #[test]
    fn test_start_hotspot_commands() {
        assert_eq!(
            rendered(RuleSetName::StartHotspot),
            vec![
                "iptables -w -N COMITUP-OUT",
                "iptables -w -A COMITUP-OUT -p icmp --icmp-type destination-unreachable -j DROP",
                "iptables -w -A COMITUP-OUT -p icmp --icmp-type port-unreachable -j DROP",
                "iptables -w -A COMITUP-OUT -j RETURN",
                "iptables -w -I OUTPUT -o uap0 -j COMITUP-OUT",
            ]
        );
    }

    #[test]
    fn test_appliance_clear_commands() {
        assert_eq!(
            rendered(RuleSetName::ApplianceClear),
            vec![
                "iptables -w -t nat -D POSTROUTING -j COMITUP-FWD",
                "iptables -w -t nat -F COMITUP-FWD",
                "iptables -w -t nat -X COMITUP-FWD",
            ]
        );
    }

    #[test]
    fn test_appliance_forwarding_commands() {
        assert_eq!(
            rendered(RuleSetName::ApplianceForwarding),
            vec![
                "iptables -w -t nat -N COMITUP-FWD",
                "iptables -w -t nat -A COMITUP-FWD -o wlan0 -j MASQUERADE",
                "iptables -w -t nat -A COMITUP-FWD -j RETURN",
                "iptables -w -t nat -A POSTROUTING -j COMITUP-FWD",
                "sysctl -w net.ipv4.ip_forward=1",
            ]
        );
    }

    #[test]
    fn test_extra_masquerade_is_insert() {
        let step = extra_masquerade(DeviceRef::new("eth0").unwrap());
        assert!(!step.best_effort);
        assert_eq!(
            step.command.to_string(),
            "iptables -w -t nat -I COMITUP-FWD -o eth0 -j MASQUERADE"
        );
    }

    #[test]
    fn test_only_teardown_sets_are_best_effort() {
        for name in RuleSetName::iter() {
            let teardown = matches!(name, RuleSetName::EndHotspot | RuleSetName::ApplianceClear);
            assert!(
                name.templates().iter().all(|t| t.best_effort == teardown),
                "{name} has mixed best-effort flags"
            );
        }
    }

    #[test]
    fn test_rule_set_display_names() {
        assert_eq!(RuleSetName::StartHotspot.to_string(), "START_HOTSPOT");
        assert_eq!(RuleSetName::ApplianceClear.to_string(), "APPLIANCE_CLEAR");
    }
}
