//! OS content client
//!
//! Drives `swupd` against the target root to bootstrap the base system
//! and add bundles. The [`ContentClient`] trait is the seam the
//! controller works through; the subprocess implementation lives here,
//! the fatal/non-fatal policy around it lives in the controller.

use crate::cmdio;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Bundles present from the base bootstrap. Adding one of these again
/// is an error in swupd, not a no-op, so the controller skips them.
const CORE_BUNDLES: [&str; 3] = ["os-core", "os-core-update", "openssh-server"];

/// Operations the installer needs from the content system.
pub trait ContentClient {
    /// Bootstrap the base OS content at `version` into the target root.
    fn verify(&self, version: &str) -> Result<()>;
    /// Bring the installed content up to the latest version.
    fn update(&self) -> Result<()>;
    /// Turn automatic content updates off on the installed system.
    fn disable_update(&self) -> Result<()>;
    /// Install one bundle.
    fn bundle_add(&self, bundle: &str) -> Result<()>;
    /// Whether `bundle` is already satisfied by the base bootstrap.
    fn is_core_bundle(&self, bundle: &str) -> bool;
}

/// swupd-backed content client.
#[derive(Debug, Clone)]
pub struct SwupdClient {
    root: PathBuf,
    mirror: Option<String>,
}

impl SwupdClient {
    pub fn new(root: &Path, mirror: Option<&str>) -> Self {
        Self {
            root: root.to_path_buf(),
            mirror: mirror.map(str::to_string),
        }
    }

    fn base_args(&self, subcommand: &str) -> Vec<String> {
        let mut args = vec![
            "swupd".to_string(),
            subcommand.to_string(),
            format!("--path={}", self.root.display()),
        ];
        if let Some(mirror) = &self.mirror {
            args.push(format!("--url={}", mirror));
        }
        args
    }

    fn run(&self, op: &str, args: Vec<String>) -> Result<()> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        cmdio::run_and_log(op, &argv)
    }
}

impl ContentClient for SwupdClient {
    fn verify(&self, version: &str) -> Result<()> {
        let mut args = self.base_args("verify");
        args.push("--install".to_string());
        args.push(format!("--manifest={}", version));
        args.push("--force".to_string());
        self.run("swupd verify", args)
    }

    fn update(&self) -> Result<()> {
        self.run("swupd update", self.base_args("update"))
    }

    fn disable_update(&self) -> Result<()> {
        let mut args = self.base_args("autoupdate");
        args.push("--disable".to_string());
        self.run("swupd autoupdate", args)
    }

    fn bundle_add(&self, bundle: &str) -> Result<()> {
        let mut args = self.base_args("bundle-add");
        args.push(bundle.to_string());
        self.run("swupd bundle-add", args)
    }

    fn is_core_bundle(&self, bundle: &str) -> bool {
        CORE_BUNDLES.contains(&bundle)
    }
}
