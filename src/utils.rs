//! Utility functions for directory management and system integration
//!
//! # Directory Structure
//!
//! - State: `~/.local/state/comitup-iptmgr/` - Runtime state (audit log)
//!
//! Interface discovery reads sysfs. Every function that touches sysfs takes the
//! sysfs root as a parameter so it can be pointed at a fixture directory.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "comitup", "comitup-iptmgr")
        .and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

pub fn ensure_state_dir() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}

/// Lists network interfaces under `<sysfs_root>/class/net`, sorted, without `lo`.
pub fn list_interfaces(sysfs_root: &Path) -> std::io::Result<Vec<String>> {
    let mut interfaces = Vec::new();
    for entry in std::fs::read_dir(sysfs_root.join("class/net"))?.flatten() {
        if let Ok(name) = entry.file_name().into_string()
            && name != "lo"
        {
            interfaces.push(name);
        }
    }
    interfaces.sort();
    Ok(interfaces)
}

/// Lists wireless interfaces (those exposing a `wireless` or `phy80211` entry), sorted.
pub fn wireless_interfaces(sysfs_root: &Path) -> std::io::Result<Vec<String>> {
    let net = sysfs_root.join("class/net");
    Ok(list_interfaces(sysfs_root)?
        .into_iter()
        .filter(|name| {
            let dir = net.join(name);
            dir.join("wireless").exists() || dir.join("phy80211").exists()
        })
        .collect())
}
