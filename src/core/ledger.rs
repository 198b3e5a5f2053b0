//! In-memory rule table
//!
//! [`MemoryRuleTable`] implements [`RuleTableGateway`] by simulating the parts
//! of iptables semantics the catalog relies on, and records every command it
//! receives in call order. It backs the `plan` dry-run and the synchronizer
//! tests, where assertions are made about the resulting table contents.
//!
//! Simulated behaviour:
//! - `-N` fails if the chain exists
//! - `-F` / `-X` fail if the chain is missing
//! - `-X` fails on built-in, referenced or non-empty chains
//! - `-A` / `-I` fail on a missing chain or a jump to a missing chain
//! - `-D` fails if no identical rule exists, and removes the first match

use crate::core::gateway::{ApplyStatus, RuleTableGateway};
use crate::core::rule::{DeviceRef, Operation, RuleCommand, RuleSpec, Table, Target};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Rule = RuleSpec<DeviceRef>;

const FILTER_BUILTINS: &[&str] = &["INPUT", "FORWARD", "OUTPUT"];
const NAT_BUILTINS: &[&str] = &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"];

#[derive(Debug, Clone, Default)]
struct TableState {
    chains: BTreeMap<(Table, &'static str), Vec<Rule>>,
    ip_forward: bool,
}

impl TableState {
    fn with_builtins() -> Self {
        let mut state = Self::default();
        for &chain in FILTER_BUILTINS {
            state.chains.insert((Table::Filter, chain), Vec::new());
        }
        for &chain in NAT_BUILTINS {
            state.chains.insert((Table::Nat, chain), Vec::new());
        }
        state
    }

    fn is_builtin(table: Table, chain: &str) -> bool {
        match table {
            Table::Filter => FILTER_BUILTINS.contains(&chain),
            Table::Nat => NAT_BUILTINS.contains(&chain),
        }
    }

    fn is_referenced(&self, table: Table, chain: &'static str) -> bool {
        self.chains
            .iter()
            .filter(|((t, _), _)| *t == table)
            .flat_map(|(_, rules)| rules)
            .any(|rule| rule.target == Target::Jump(chain))
    }

    fn check_target(&self, table: Table, rule: &Rule) -> Result<(), String> {
        if let Target::Jump(target) = rule.target
            && !self.chains.contains_key(&(table, target))
        {
            return Err(format!(
                "iptables v1.8.9 (legacy): Couldn't load target `{target}':No such file or directory"
            ));
        }
        Ok(())
    }

    fn apply(&mut self, table: Table, op: &Operation<DeviceRef>) -> Result<(), String> {
        const NO_CHAIN: &str = "iptables: No chain/target/match by that name.";

        let key = (table, op.chain());
        match op {
            Operation::NewChain(_) => {
                if self.chains.contains_key(&key) {
                    return Err("iptables: Chain already exists.".to_string());
                }
                self.chains.insert(key, Vec::new());
            }
            Operation::FlushChain(_) => {
                self.chains.get_mut(&key).ok_or(NO_CHAIN)?.clear();
            }
            Operation::DeleteChain(chain) => {
                if Self::is_builtin(table, chain) {
                    return Err("iptables: Invalid argument.".to_string());
                }
                let rules = self.chains.get(&key).ok_or(NO_CHAIN)?;
                if !rules.is_empty() {
                    return Err("iptables: Directory not empty.".to_string());
                }
                if self.is_referenced(table, *chain) {
                    return Err("iptables: Too many links.".to_string());
                }
                self.chains.remove(&key);
            }
            Operation::Append(_, rule) | Operation::Insert(_, rule) => {
                self.check_target(table, rule)?;
                let rules = self.chains.get_mut(&key).ok_or(NO_CHAIN)?;
                if matches!(op, Operation::Insert(..)) {
                    rules.insert(0, rule.clone());
                } else {
                    rules.push(rule.clone());
                }
            }
            Operation::Delete(_, rule) => {
                let rules = self.chains.get_mut(&key).ok_or(NO_CHAIN)?;
                let position = rules.iter().position(|r| r == rule).ok_or(
                    "iptables: Bad rule (does a matching rule exist in that chain?).",
                )?;
                rules.remove(position);
            }
        }
        Ok(())
    }
}

/// Simulated kernel rule table with a call ledger
#[derive(Debug)]
pub struct MemoryRuleTable {
    state: Mutex<TableState>,
    ledger: Mutex<Vec<RuleCommand>>,
}

impl Default for MemoryRuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuleTable {
    /// Creates a table holding only the built-in chains.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState::with_builtins()),
            ledger: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        // A poisoned lock only means a panicking test; the data is still usable
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ledger(&self) -> MutexGuard<'_, Vec<RuleCommand>> {
        self.ledger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Every command received so far, in call order
    pub fn commands(&self) -> Vec<RuleCommand> {
        self.ledger().clone()
    }

    /// Rendered command lines received so far, in call order
    pub fn command_lines(&self) -> Vec<String> {
        self.ledger().iter().map(ToString::to_string).collect()
    }

    pub fn clear_ledger(&self) {
        self.ledger().clear();
    }

    /// Rules of a chain, or `None` if the chain does not exist
    pub fn chain(&self, table: Table, chain: &'static str) -> Option<Vec<RuleSpec<DeviceRef>>> {
        self.state().chains.get(&(table, chain)).cloned()
    }

    pub fn has_chain(&self, table: Table, chain: &'static str) -> bool {
        self.state().chains.contains_key(&(table, chain))
    }

    /// Number of rules in any chain of `table` jumping to `chain`
    pub fn hook_count(&self, table: Table, chain: &'static str) -> usize {
        self.state()
            .chains
            .iter()
            .filter(|((t, _), _)| *t == table)
            .flat_map(|(_, rules)| rules)
            .filter(|rule| rule.target == Target::Jump(chain))
            .count()
    }

    pub fn ip_forward(&self) -> bool {
        self.state().ip_forward
    }

    /// Human-readable listing of user-defined chains, similar to `iptables -S`
    pub fn dump(&self) -> Vec<String> {
        let state = self.state();
        let mut lines = Vec::new();
        for ((table, chain), rules) in &state.chains {
            if TableState::is_builtin(*table, chain) && rules.is_empty() {
                continue;
            }
            if !TableState::is_builtin(*table, chain) {
                lines.push(format!("-t {} -N {chain}", table.name()));
            }
            for rule in rules {
                let command = RuleCommand::Iptables {
                    table: *table,
                    op: Operation::Append(*chain, rule.clone()),
                };
                let args = command.iptables_args().unwrap_or_default();
                // Drop "-w" and any table selector; prefix the table explicitly
                let rest: Vec<&str> = args
                    .iter()
                    .map(String::as_str)
                    .skip_while(|a| *a != "-A")
                    .collect();
                lines.push(format!("-t {} {}", table.name(), rest.join(" ")));
            }
        }
        if state.ip_forward {
            lines.push("net.ipv4.ip_forward = 1".to_string());
        }
        lines
    }
}

impl RuleTableGateway for MemoryRuleTable {
    async fn apply(&self, command: &RuleCommand) -> ApplyStatus {
        self.ledger().push(command.clone());

        let result = match command {
            RuleCommand::Iptables { table, op } => self.state().apply(*table, op),
            RuleCommand::EnableIpv4Forwarding => {
                self.state().ip_forward = true;
                Ok(())
            }
        };

        match result {
            Ok(()) => ApplyStatus::Applied,
            Err(stderr) => ApplyStatus::Rejected {
                exit_code: Some(1),
                stderr,
            },
        }
    }
}
