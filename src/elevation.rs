//! Privilege elevation for rule-table commands
//!
//! The synchronizer normally runs as root under the connection manager, in
//! which case commands are executed directly. When started as an ordinary user
//! (the `plan`/`demo` subcommands during development, for example) the
//! commands are wrapped in a non-interactive elevation helper.
//!
//! # Elevation Strategy
//!
//! 1. `COMITUP_TEST_NO_ELEVATION` set: run directly (testing only)
//! 2. Effective root: run directly
//! 3. `COMITUP_ELEVATION_METHOD` set: use that helper or fail
//! 4. Otherwise the first available of `sudo -n`, `doas -n`, `run0`
//!
//! Helpers are always invoked non-interactively. A password prompt would
//! block a transition until the command timeout expires.
//!
//! # Environment Variables
//!
//! - `COMITUP_ELEVATION_METHOD`: Force a specific method (`sudo`, `doas`, or `run0`).
//! - `COMITUP_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Commands are constructed without shell interpolation
//! - Device names are validated before they reach an argument vector
//!
//! # Example
//!
//! ```no_run
//! use comitup_iptmgr::elevation::create_elevated_command;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cmd = create_elevated_command("iptables", &["-w", "-S"])?;
//! let output = cmd.output().await?;
//! # Ok(())
//! # }
//! ```

use tokio::process::Command;

pub const ELEVATION_METHOD_VAR: &str = "COMITUP_ELEVATION_METHOD";
pub const TEST_NO_ELEVATION_VAR: &str = "COMITUP_TEST_NO_ELEVATION";

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Not root and no elevation helper found
    #[error("Not running as root and no elevation helper (sudo, doas, run0) was found")]
    NotPrivileged,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `COMITUP_ELEVATION_METHOD`
    #[error("Invalid COMITUP_ELEVATION_METHOD '{0}'. Valid options: sudo, doas, run0")]
    InvalidMethod(String),
}

/// Supported elevation helpers, in auto-detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElevationMethod {
    Sudo,
    Doas,
    Run0,
}

impl ElevationMethod {
    /// Flags that keep the helper from prompting
    fn non_interactive_args(self) -> &'static [&'static str] {
        match self {
            ElevationMethod::Sudo | ElevationMethod::Doas => &["-n"],
            ElevationMethod::Run0 => &["--no-ask-password"],
        }
    }

    fn wrap(self, program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(self.to_string());
        cmd.args(self.non_interactive_args()).arg(program).args(args);
        cmd
    }
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Whether commands run without any elevation helper.
///
/// True when running as root, or when elevation is disabled for tests.
pub fn has_direct_privilege() -> bool {
    std::env::var_os(TEST_NO_ELEVATION_VAR).is_some() || nix::unistd::geteuid().is_root()
}

/// Picks the elevation helper, honouring `COMITUP_ELEVATION_METHOD`.
///
/// # Errors
///
/// Returns `InvalidMethod` for an unknown override, `MethodNotAvailable` if the
/// requested helper is missing, and `NotPrivileged` if auto-detection finds none.
pub fn select_method() -> Result<ElevationMethod, ElevationError> {
    use strum::IntoEnumIterator;

    if let Ok(method) = std::env::var(ELEVATION_METHOD_VAR) {
        let method = method.trim().to_lowercase();
        if !method.is_empty() {
            let parsed: ElevationMethod = method
                .parse()
                .map_err(|_| ElevationError::InvalidMethod(method.clone()))?;
            if !binary_exists(&method) {
                return Err(ElevationError::MethodNotAvailable(method));
            }
            return Ok(parsed);
        }
    }

    ElevationMethod::iter()
        .find(|m| binary_exists(&m.to_string()))
        .ok_or(ElevationError::NotPrivileged)
}

/// Creates a command that runs `program` with root privileges.
///
/// Arguments are passed directly without shell interpretation. Callers must
/// validate anything user-controlled before it reaches `args`.
///
/// # Errors
///
/// Returns `ElevationError` if elevation is needed and no usable helper exists.
///
/// # Testing
///
/// Set `COMITUP_TEST_NO_ELEVATION=1` to run `program` directly.
pub fn create_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    if has_direct_privilege() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    Ok(select_method()?.wrap(program, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    fn argv(cmd: &Command) -> Vec<String> {
        let std_cmd = cmd.as_std();
        std::iter::once(std_cmd.get_program())
            .chain(std_cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        assert!(!binary_exists("comitup_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_direct_command_in_test_mode() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var(TEST_NO_ELEVATION_VAR, "1");
        }

        let cmd = create_elevated_command("iptables", &["-w", "-N", "COMITUP-OUT"]).unwrap();
        assert!(has_direct_privilege());

        unsafe {
            std::env::remove_var(TEST_NO_ELEVATION_VAR);
        }

        assert_eq!(argv(&cmd), vec!["iptables", "-w", "-N", "COMITUP-OUT"]);
    }

    #[test]
    fn test_wrapped_command_is_non_interactive() {
        let cmd = ElevationMethod::Sudo.wrap("iptables", &["-w", "-F", "COMITUP-OUT"]);
        assert_eq!(argv(&cmd), vec!["sudo", "-n", "iptables", "-w", "-F", "COMITUP-OUT"]);

        let cmd = ElevationMethod::Run0.wrap("sysctl", &["-w", "net.ipv4.ip_forward=1"]);
        assert_eq!(
            argv(&cmd),
            vec!["run0", "--no-ask-password", "sysctl", "-w", "net.ipv4.ip_forward=1"]
        );
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var(ELEVATION_METHOD_VAR, "pkexec");
        }

        let result = select_method();

        unsafe {
            std::env::remove_var(ELEVATION_METHOD_VAR);
        }

        assert!(matches!(result, Err(ElevationError::InvalidMethod(m)) if m == "pkexec"));
    }

    #[test]
    fn test_elevation_method_case_insensitive() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var(ELEVATION_METHOD_VAR, "SUDO");
        }

        let result = select_method();

        unsafe {
            std::env::remove_var(ELEVATION_METHOD_VAR);
        }

        // Either sudo exists or it doesn't, but the name itself is valid
        assert!(!matches!(result, Err(ElevationError::InvalidMethod(_))));
    }

    #[test]
    fn test_method_names() {
        assert_eq!("doas".parse::<ElevationMethod>().unwrap(), ElevationMethod::Doas);
        assert_eq!(ElevationMethod::Run0.to_string(), "run0");
        assert!("su".parse::<ElevationMethod>().is_err());
    }
}
