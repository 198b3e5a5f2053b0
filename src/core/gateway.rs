//! Rule-table gateway
//!
//! The kernel rule table is global mutable state outside the process. All
//! mutations go through [`RuleTableGateway::apply`]:
//!
//! - [`CommandExecutor`] dispatches to `iptables` and `/proc` (production)
//! - [`MemoryRuleTable`](crate::core::ledger::MemoryRuleTable) simulates the
//!   table in memory (tests, dry-runs)
//!
//! `apply` never returns an error. A failing command is reported through
//! [`ApplyStatus`] and the caller decides whether it matters.

use crate::core::rule::RuleCommand;
use crate::elevation;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, error};

/// Default per-command bound; iptables calls are fast local operations
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Outcome of a single rule-table mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,
    /// The command ran and exited non-zero
    Rejected {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The command did not finish within the bound and was killed
    TimedOut(Duration),
    /// The command could not be started at all
    Unavailable(String),
}

impl ApplyStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ApplyStatus::Applied)
    }

    /// Error text worth translating, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ApplyStatus::Rejected { stderr, .. } => Some(stderr),
            ApplyStatus::Unavailable(reason) => Some(reason),
            ApplyStatus::Applied | ApplyStatus::TimedOut(_) => None,
        }
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyStatus::Applied => f.write_str("applied"),
            ApplyStatus::Rejected { exit_code, stderr } => {
                match exit_code {
                    Some(code) => write!(f, "exit status {code}")?,
                    None => f.write_str("terminated by signal")?,
                }
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            ApplyStatus::TimedOut(bound) => write!(f, "timed out after {}ms", bound.as_millis()),
            ApplyStatus::Unavailable(reason) => write!(f, "not started: {reason}"),
        }
    }
}

/// Single point of mutation for the kernel rule table
pub trait RuleTableGateway: Send + Sync {
    /// Applies one fully-resolved command and reports its status.
    fn apply(&self, command: &RuleCommand) -> impl Future<Output = ApplyStatus> + Send;
}

/// Production gateway: runs each command against the OS, one at a time.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    iptables: String,
    timeout: Duration,
    ip_forward_path: PathBuf,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            iptables: "iptables".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            ip_forward_path: PathBuf::from(IP_FORWARD_PATH),
        }
    }
}

impl CommandExecutor {
    pub fn new(iptables: impl Into<String>, timeout: Duration) -> Self {
        Self {
            iptables: iptables.into(),
            timeout,
            ..Self::default()
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            iptables: config.iptables_command.clone(),
            timeout: config.command_timeout(),
            ip_forward_path: config.ip_forward_path.clone(),
        }
    }

    pub fn with_ip_forward_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ip_forward_path = path.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `program` with `args` (elevated if needed), bounded by the timeout.
    ///
    /// Arguments are passed directly, without shell interpretation. The child
    /// is killed if the bound expires.
    pub async fn run(&self, program: &str, args: &[&str]) -> ApplyStatus {
        let mut cmd = match elevation::create_elevated_command(program, args) {
            Ok(cmd) => cmd,
            Err(e) => return ApplyStatus::Unavailable(e.to_string()),
        };

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {program}: {e}");
                return ApplyStatus::Unavailable(format!("failed to spawn {program}: {e}"));
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => ApplyStatus::TimedOut(self.timeout),
            Ok(Err(e)) => ApplyStatus::Unavailable(format!("failed to wait for {program}: {e}")),
            Ok(Ok(output)) if output.status.success() => ApplyStatus::Applied,
            Ok(Ok(output)) => ApplyStatus::Rejected {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
        }
    }

    async fn enable_ipv4_forwarding(&self) -> ApplyStatus {
        if !elevation::has_direct_privilege() {
            return self.run("sysctl", &["-w", "net.ipv4.ip_forward=1"]).await;
        }

        let write = tokio::fs::write(&self.ip_forward_path, "1\n");
        match tokio::time::timeout(self.timeout, write).await {
            Err(_) => ApplyStatus::TimedOut(self.timeout),
            Ok(Err(e)) => ApplyStatus::Rejected {
                exit_code: None,
                stderr: format!("{}: {e}", self.ip_forward_path.display()),
            },
            Ok(Ok(())) => ApplyStatus::Applied,
        }
    }
}

impl RuleTableGateway for CommandExecutor {
    async fn apply(&self, command: &RuleCommand) -> ApplyStatus {
        let status = match command.iptables_args() {
            Some(args) => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run(&self.iptables, &args).await
            }
            None => self.enable_ipv4_forwarding().await,
        };
        debug!("{command}: {status}");
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let rejected = ApplyStatus::Rejected {
            exit_code: Some(1),
            stderr: "iptables: Chain already exists.\n".to_string(),
        };
        assert_eq!(
            rejected.to_string(),
            "exit status 1: iptables: Chain already exists."
        );

        let signalled = ApplyStatus::Rejected {
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(signalled.to_string(), "terminated by signal");

        assert_eq!(
            ApplyStatus::TimedOut(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
    }

    #[test]
    fn test_status_success() {
        assert!(ApplyStatus::Applied.is_success());
        assert!(!ApplyStatus::TimedOut(DEFAULT_COMMAND_TIMEOUT).is_success());
        assert!(!ApplyStatus::Unavailable("x".into()).is_success());
    }

    #[test]
    fn test_status_stderr() {
        assert_eq!(ApplyStatus::Applied.stderr(), None);
        assert_eq!(ApplyStatus::Unavailable("no sudo".into()).stderr(), Some("no sudo"));
    }

    #[test]
    fn test_executor_defaults() {
        let executor = CommandExecutor::default();
        assert_eq!(executor.timeout(), DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(executor.ip_forward_path, PathBuf::from(IP_FORWARD_PATH));
    }
}
