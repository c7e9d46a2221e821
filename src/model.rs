//! Install description
//!
//! The declarative input: which media to install to, which bundles,
//! users, hooks and policies to apply. Loaded from a JSON document,
//! validated before the controller runs, and optionally written back
//! (sanitized) next to the installed system afterwards.

use crate::error::{InstallerError, Result};
use crate::storage::BlockDevice;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A user account to create on the installed system.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct User {
    pub login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Pre-hashed password, as accepted by chpasswd -e.
    pub password: String,
    pub admin: bool,
}

/// A shell command run before or after install.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstallHook {
    pub cmd: String,
    /// Run inside the target root instead of the host.
    pub chroot: bool,
}

/// Telemetry policy for the installer and the installed system.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

fn default_auto_update() -> bool {
    true
}

/// The complete declarative install description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallDescription {
    /// Disks to partition and install onto.
    pub target_medias: Vec<BlockDevice>,
    /// Content bundles to install beyond the base set.
    pub bundles: Vec<String>,
    /// Kernel bundle, installed like any other bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_bundle: Option<String>,
    pub users: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Leave automatic content updates on after install.
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    /// Archive the config and log into the installed system.
    pub post_archive: bool,
    /// Explicit content version; the host's version when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swupd_mirror: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    pub telemetry: TelemetrySettings,
    pub pre_install: Vec<InstallHook>,
    pub post_install: Vec<InstallHook>,
}

impl Default for InstallDescription {
    fn default() -> Self {
        Self {
            target_medias: Vec::new(),
            bundles: Vec::new(),
            kernel_bundle: None,
            users: Vec::new(),
            hostname: None,
            auto_update: true,
            post_archive: false,
            version: None,
            swupd_mirror: None,
            https_proxy: None,
            telemetry: TelemetrySettings::default(),
            pre_install: Vec::new(),
            post_install: Vec::new(),
        }
    }
}

impl InstallDescription {
    /// Load a description from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read install description {}", path.display()))?;
        let mut desc: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse install description {}", path.display()))?;

        // Intents are not serialized; everything the description asks
        // for is user-defined, pending work.
        for media in &mut desc.target_medias {
            media.user_defined = true;
            for child in &mut media.children {
                child.user_defined = true;
                child.make_partition = true;
                child.format_partition = true;
            }
        }

        Ok(desc)
    }

    /// Write the description to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Check the description is installable.
    pub fn validate(&self) -> Result<()> {
        if self.target_medias.is_empty() {
            return Err(InstallerError::config("no target media configured"));
        }

        for media in &self.target_medias {
            media.validate()?;
        }

        for user in &self.users {
            if user.login.is_empty() {
                return Err(InstallerError::config("user with empty login"));
            }
            if user.password.is_empty() {
                return Err(InstallerError::config(format!(
                    "user {} has no password",
                    user.login
                )));
            }
        }
        if !self.users.is_empty() && !self.users.iter().any(|u| u.admin) {
            return Err(InstallerError::config(
                "at least one user must be an administrator",
            ));
        }

        Ok(())
    }

    /// Add a target media, replacing a previous entry for the same
    /// device.
    pub fn add_target_media(&mut self, media: BlockDevice) {
        if let Some(existing) = self.target_medias.iter_mut().find(|m| m.equals(&media)) {
            *existing = media;
        } else {
            self.target_medias.push(media);
        }
    }

    /// Copy with personally identifying fields stripped, safe to record
    /// via telemetry or archive on the installed system.
    pub fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        copy.users.clear();
        copy.hostname = None;
        copy.https_proxy = None;
        copy.swupd_mirror = None;
        copy
    }
}
