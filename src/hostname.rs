//! Hostname configuration for the installed system.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Write the hostname into the target root's /etc/hostname.
pub fn apply_hostname(root: &Path, hostname: &str) -> Result<()> {
    let etc = root.join("etc");
    fs::create_dir_all(&etc)?;
    fs::write(etc.join("hostname"), format!("{}\n", hostname))?;
    Ok(())
}
