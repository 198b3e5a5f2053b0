use crate::core::gateway::ApplyStatus;
use crate::core::resolve::DeviceRole;
use thiserror::Error;

/// Core error types for comitup-iptmgr
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rule synchronization failed
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Configuration file is present but unusable
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors surfaced by [`RuleSynchronizer`](crate::core::sync::RuleSynchronizer)
#[derive(Debug, Error)]
pub enum SyncError {
    /// One or more install commands returned a failure status.
    ///
    /// The remaining commands of the transition were still executed.
    #[error("{} rule command(s) failed, first: {}", failures.len(), first_failure(failures))]
    ExternalCommandFailed { failures: Vec<CommandFailure> },

    /// A required device could not be resolved; no command was issued
    #[error("Failed to resolve {role} device: {source}")]
    DeviceResolutionFailed {
        role: DeviceRole,
        #[source]
        source: ResolveError,
    },
}

fn first_failure(failures: &[CommandFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Resolver errors (device naming, routing table, sysfs)
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No wireless interface found")]
    NoWirelessDevice,

    #[error("Invalid interface name '{name}': {reason}")]
    InvalidDevice { name: String, reason: String },

    #[error("Malformed routing table: {0}")]
    MalformedRouteTable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A non-best-effort command that did not succeed
#[derive(Debug, Clone)]
pub struct CommandFailure {
    /// Rendered command line, for logs
    pub command: String,
    pub status: ApplyStatus,
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` ({})", self.command, self.status)
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub kind: IptablesErrorKind,
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(kind: IptablesErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Coarse classification of iptables failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IptablesErrorKind {
    /// Chain, rule or target is absent (expected during teardown)
    Missing,
    AlreadyExists,
    /// Chain still referenced or not empty
    InUse,
    Permission,
    LockHeld,
    NotInstalled,
    Other,
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an iptables stderr message against known patterns.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("you must be root")
            || lower.contains("operation not permitted")
        {
            return ErrorTranslation::new(
                IptablesErrorKind::Permission,
                "Insufficient permissions to modify iptables rules",
            )
            .with_suggestion("Run the service as root")
            .with_suggestion("Or set COMITUP_ELEVATION_METHOD=sudo with a NOPASSWD sudoers rule")
            .with_suggestion("Check that CAP_NET_ADMIN is available");
        }

        // Another process holds the xtables lock past the -w wait
        if lower.contains("xtables lock") {
            return ErrorTranslation::new(
                IptablesErrorKind::LockHeld,
                "Another program is holding the xtables lock",
            )
            .with_suggestion("Check for a concurrent firewall manager (ufw, firewalld)")
            .with_suggestion("The transition can be re-delivered once the lock is free");
        }

        // Missing binary
        if (lower.contains("no such file or directory")
            && lower.contains("iptables")
            && !lower.contains("couldn't load target"))
            || lower.contains("command not found")
        {
            return ErrorTranslation::new(
                IptablesErrorKind::NotInstalled,
                "iptables is not installed or not found in PATH",
            )
            .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Raspberry Pi OS)")
            .with_suggestion("Or point iptables_command at the binary in the config file");
        }

        // Chain already present
        if lower.contains("chain already exists") || lower.contains("file exists") {
            return ErrorTranslation::new(
                IptablesErrorKind::AlreadyExists,
                "Chain already exists",
            )
            .with_suggestion("A previous transition was not torn down")
            .with_suggestion("Re-delivering the transition clears the chain first");
        }

        // Chain referenced from a hook, or still holding rules
        if lower.contains("too many links") || lower.contains("directory not empty") {
            return ErrorTranslation::new(IptablesErrorKind::InUse, "Chain is still in use")
                .with_suggestion("Remove the hook referencing the chain before deleting it")
                .with_suggestion("Flush the chain before deleting it");
        }

        // Missing chain, rule or target
        if lower.contains("no chain/target/match by that name")
            || lower.contains("couldn't load target")
            || lower.contains("does a matching rule exist")
            || lower.contains("doesn't exist")
            || lower.contains("does not exist")
        {
            return ErrorTranslation::new(
                IptablesErrorKind::Missing,
                "Chain, rule or target not found",
            )
            .with_suggestion("Expected during teardown when no rules were installed");
        }

        // Generic fallback
        ErrorTranslation::new(
            IptablesErrorKind::Other,
            format!("iptables error: {}", msg.trim()),
        )
        .with_suggestion("Verify iptables is working: sudo iptables -L -n")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
