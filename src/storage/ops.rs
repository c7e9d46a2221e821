//! Filesystem creation and mounting
//!
//! Turns committed partitions into filesystems and mounts the target
//! tree. Mount order matters: a parent path must be mounted before any
//! path it prefixes, so mount points are sorted by path depth first.
//! Unmounting walks the same list in reverse and never escalates
//! failures; a stuck unmount during cleanup must not fail the install.

use crate::cmdio;
use crate::error::{InstallerError, Result};
use crate::storage::block_device::{BlockDevice, FsKind};
use log::{info, warn};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Clamp a label to the filesystem's maximum length.
pub fn clamp_label(label: &str, fs: &FsKind) -> String {
    let max = fs.max_label_length();
    if label.len() > max {
        warn!("label {} truncated to {} characters", label, max);
    }
    label.chars().take(max).collect()
}

/// Build the mkfs invocation for a planned partition.
pub fn mkfs_command(part: &BlockDevice) -> Result<Vec<String>> {
    let fs = part
        .fs_type
        .as_ref()
        .ok_or_else(|| InstallerError::storage(format!("{}: no filesystem kind", part.name)))?;
    let dev = part.device_file().display().to_string();

    let mut cmd: Vec<String> = match fs {
        FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4 => {
            vec![format!("mkfs.{}", fs), "-F".into(), "-b".into(), "4096".into()]
        }
        FsKind::Vfat => vec!["mkfs.vfat".into(), "-F32".into()],
        FsKind::Xfs => vec!["mkfs.xfs".into(), "-f".into()],
        FsKind::Btrfs => vec!["mkfs.btrfs".into(), "-f".into()],
        FsKind::F2fs => vec!["mkfs.f2fs".into(), "-f".into()],
        FsKind::Swap => vec!["mkswap".into()],
        FsKind::Other(name) => {
            return Err(InstallerError::storage(format!(
                "cannot create a {} filesystem on {}",
                name, part.name
            )))
        }
    };

    if let Some(label) = part.label.as_deref().filter(|l| !l.is_empty()) {
        let flag = match fs {
            FsKind::Vfat => "-n",
            FsKind::F2fs => "-l",
            _ => "-L",
        };
        cmd.push(flag.into());
        cmd.push(clamp_label(label, fs));
    }

    cmd.push(dev);
    Ok(cmd)
}

/// Create the filesystem for a planned partition. Fatal on failure.
pub fn make_fs(part: &BlockDevice) -> Result<()> {
    let cmd = mkfs_command(part)?;
    let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
    cmdio::run_and_log("mkfs", &args)
}

fn mount_key(path: &str) -> (usize, String) {
    let depth = path.split('/').filter(|c| !c.is_empty()).count();
    (depth, path.to_string())
}

/// Order mount points so that a path always follows its own prefixes:
/// `/` first, `/var` before `/var/log`.
pub fn sort_mount_points(points: &mut [String]) {
    points.sort_by(|a, b| {
        let (da, db) = (mount_key(a), mount_key(b));
        match da.0.cmp(&db.0) {
            Ordering::Equal => da.1.cmp(&db.1),
            other => other,
        }
    });
}

/// Partitions of `medias` that get mounted, in mount order.
pub fn mounts_in_order(medias: &[BlockDevice]) -> Vec<&BlockDevice> {
    let mut parts: Vec<&BlockDevice> = medias
        .iter()
        .flat_map(|m| m.children.iter())
        .filter(|c| c.mount_point.is_some() && c.fs_type != Some(FsKind::Swap))
        .collect();
    parts.sort_by(|a, b| {
        // Filtered on mount_point above.
        let ka = mount_key(a.mount_point.as_deref().unwrap_or(""));
        let kb = mount_key(b.mount_point.as_deref().unwrap_or(""));
        ka.cmp(&kb)
    });
    parts
}

/// Pseudo-filesystems a working chroot needs.
const META_FS: [(&str, &[&str]); 3] = [
    ("proc", &["-t", "proc", "proc"]),
    ("sys", &["-t", "sysfs", "sysfs"]),
    ("dev", &["--bind", "/dev"]),
];

/// Tracks everything mounted under the install root, for orderly
/// teardown.
#[derive(Debug, Default)]
pub struct Mounter {
    mounted: Vec<PathBuf>,
}

impl Mounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn target_for(root: &Path, mount_point: &str) -> PathBuf {
        root.join(mount_point.trim_start_matches('/'))
    }

    /// Mount one partition at its mount point under `root`.
    pub fn mount(&mut self, root: &Path, part: &BlockDevice) -> Result<()> {
        let point = part.mount_point.as_deref().ok_or_else(|| {
            InstallerError::storage(format!("{} has no mount point", part.name))
        })?;
        let target = Self::target_for(root, point);
        fs::create_dir_all(&target)?;

        let dev = part.device_file().display().to_string();
        let target_str = target.display().to_string();
        cmdio::run_and_log("mount", &["mount", &dev, &target_str])?;

        self.mounted.push(target);
        Ok(())
    }

    /// Mount all target partitions in prefix order.
    pub fn mount_all(&mut self, root: &Path, medias: &[BlockDevice]) -> Result<()> {
        for part in mounts_in_order(medias) {
            self.mount(root, part)?;
        }
        Ok(())
    }

    /// Mount the chroot pseudo-filesystems under `root`.
    pub fn mount_meta_fs(&mut self, root: &Path) -> Result<()> {
        for (dir, args) in META_FS {
            let target = root.join(dir);
            fs::create_dir_all(&target)?;
            let target_str = target.display().to_string();

            let mut cmd = vec!["mount"];
            cmd.extend_from_slice(args);
            cmd.push(&target_str);
            cmdio::run_and_log("mount meta", &cmd)?;

            self.mounted.push(target);
        }
        Ok(())
    }

    /// Unmount everything, deepest first. Failures are collected and
    /// returned, never escalated.
    pub fn umount_all(&mut self) -> Vec<InstallerError> {
        let mut failures = Vec::new();

        self.mounted.sort();
        for target in self.mounted.drain(..).rev() {
            let target_str = target.display().to_string();
            info!("unmounting {}", target_str);
            if let Err(e) = cmdio::run_and_log("umount", &["umount", &target_str]) {
                warn!("failed to unmount {}: {}", target_str, e);
                failures.push(e);
            }
        }

        failures
    }
}
