//! Input validation for values that end up on a command line
//!
//! Interface names come from sysfs, the routing table or configuration and are
//! passed as separate `argv` entries. They are still checked against the kernel
//! naming rules so that a malformed name is rejected before any command runs.

/// Maximum interface name length (IFNAMSIZ - 1)
pub const MAX_INTERFACE_LEN: usize = 15;

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - 1 to 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
/// - Cannot start with a dash (would read as an option)
///
/// # Errors
///
/// Returns `Err` with a human-readable reason if the name violates these rules.
///
/// # Examples
///
/// ```
/// use comitup_iptmgr::validators::validate_interface;
///
/// assert!(validate_interface("wlan0").is_ok());
/// assert!(validate_interface("wlan0 -j ACCEPT").is_err());
/// ```
pub fn validate_interface(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Interface name is empty".to_string());
    }

    if name.len() > MAX_INTERFACE_LEN {
        return Err(format!(
            "Interface name too long (max {MAX_INTERFACE_LEN} characters)"
        ));
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if name.starts_with('-') {
        return Err("Interface name cannot start with '-'".to_string());
    }

    // ASCII only, so multi-byte lookalikes cannot get through
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates the configured packet-filter command.
///
/// Accepts a bare program name (looked up on `PATH`) or an absolute path.
///
/// # Errors
///
/// Returns `Err` for empty values, relative paths, or names containing
/// whitespace or shell metacharacters.
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.is_empty() {
        return Err("Command is empty".to_string());
    }

    if command.contains('/') && !command.starts_with('/') {
        return Err(format!("Command path must be absolute: {command}"));
    }

    if command.starts_with('-') {
        return Err("Command cannot start with '-'".to_string());
    }

    if !command
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '+'))
    {
        return Err(format!("Command contains invalid characters: {command}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_interface_valid() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("wlan0").is_ok());
        assert!(validate_interface("uap0").is_ok());
        assert!(validate_interface("br-lan").is_ok());
        assert!(validate_interface("eth0.100").is_ok());
        assert!(validate_interface("wlx_00c0ca").is_ok());
        assert!(validate_interface("a23456789012345").is_ok());
    }

    #[test]
    fn test_validate_interface_empty() {
        assert!(validate_interface("").is_err());
    }

    #[test]
    fn test_validate_interface_too_long() {
        let err = validate_interface("a234567890123456").unwrap_err();
        assert!(err.contains("too long"));
    }

    #[test]
    fn test_validate_interface_dots() {
        assert!(validate_interface(".").is_err());
        assert!(validate_interface("..").is_err());
    }

    #[test]
    fn test_validate_interface_leading_dash() {
        assert!(validate_interface("-j").is_err());
        assert!(validate_interface("--flush").is_err());
    }

    #[test]
    fn test_validate_interface_injection() {
        assert!(validate_interface("eth0; rm -rf /").is_err());
        assert!(validate_interface("eth0 -j ACCEPT").is_err());
        assert!(validate_interface("eth0\n").is_err());
        assert!(validate_interface("eth$(id)").is_err());
        assert!(validate_interface("eth0+").is_err());
    }

    #[test]
    fn test_validate_interface_unicode_rejected() {
        // Cyrillic 'е' looks like ASCII 'e'
        assert!(validate_interface("\u{0435}th0").is_err());
    }

    #[test]
    fn test_validate_command() {
        assert!(validate_command("iptables").is_ok());
        assert!(validate_command("iptables-legacy").is_ok());
        assert!(validate_command("/usr/sbin/iptables").is_ok());
        assert!(validate_command("/usr/sbin/iptables-nft").is_ok());
    }

    #[test]
    fn test_validate_command_rejects_bad_values() {
        assert!(validate_command("").is_err());
        assert!(validate_command("sbin/iptables").is_err());
        assert!(validate_command("-iptables").is_err());
        assert!(validate_command("iptables -F").is_err());
        assert!(validate_command("iptables;reboot").is_err());
    }
}
