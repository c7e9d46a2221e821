//! Command line interface definition.

use crate::lockfile::DEFAULT_LOCK_PATH;
use crate::model::InstallDescription;
use clap::Parser;
use std::path::PathBuf;

/// Declarative installer for swupd-based Linux systems.
#[derive(Parser, Debug)]
#[command(name = "keel", version, about, long_about = None)]
pub struct Cli {
    /// Install description file (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Validate the install description and exit
    #[arg(long)]
    pub validate_only: bool,

    /// Log file path
    #[arg(long, default_value = "/var/log/keel-install.log")]
    pub log_file: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Mount the target under this directory instead of an ephemeral one
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Lock file path
    #[arg(long, default_value = DEFAULT_LOCK_PATH)]
    pub lock_file: PathBuf,

    /// Install this content version instead of the host's
    #[arg(long, value_name = "VERSION")]
    pub install_version: Option<String>,

    /// Content mirror URL
    #[arg(long)]
    pub mirror: Option<String>,

    /// Disable telemetry regardless of the description
    #[arg(long)]
    pub no_telemetry: bool,

    /// Archive the description and log into the installed system
    #[arg(long)]
    pub archive: bool,

    /// Reboot once the install finishes
    #[arg(long)]
    pub reboot: bool,

    /// Pick an install target automatically when the description
    /// names no target media
    #[arg(long)]
    pub auto: bool,

    /// Allow automatic targeting to erase a disk when no safe
    /// target exists
    #[arg(long, requires = "auto")]
    pub destructive: bool,
}

impl Cli {
    /// Fold command line overrides into the loaded description.
    pub fn apply_overrides(&self, desc: &mut InstallDescription) {
        if let Some(version) = &self.install_version {
            desc.version = Some(version.clone());
        }
        if let Some(mirror) = &self.mirror {
            desc.swupd_mirror = Some(mirror.clone());
        }
        if self.no_telemetry {
            desc.telemetry.enabled = false;
        }
        if self.archive {
            desc.post_archive = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "keel",
            "--config",
            "desc.json",
            "--install-version",
            "41420",
            "--mirror",
            "https://m.example",
            "--no-telemetry",
            "--archive",
        ]);

        let mut desc = InstallDescription::default();
        desc.telemetry.enabled = true;
        cli.apply_overrides(&mut desc);

        assert_eq!(desc.version.as_deref(), Some("41420"));
        assert_eq!(desc.swupd_mirror.as_deref(), Some("https://m.example"));
        assert!(!desc.telemetry.enabled);
        assert!(desc.post_archive);
    }

    #[test]
    fn test_defaults_leave_description_alone() {
        let cli = Cli::parse_from(["keel", "--config", "desc.json"]);

        let mut desc = InstallDescription::default();
        desc.version = Some("100".to_string());
        cli.apply_overrides(&mut desc);

        assert_eq!(desc.version.as_deref(), Some("100"));
        assert!(!desc.post_archive);
    }
}
