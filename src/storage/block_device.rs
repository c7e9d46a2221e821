//! Block device model
//!
//! In-memory tree of disks and their partitions. This is the planning
//! model: discovery parses `lsblk` output into it, the layout generator
//! and manual edits mutate it, and the controller walks it to drive
//! partitioning, formatting and mounting. Nothing here touches the disk;
//! pending work is tracked with the `make_partition`/`format_partition`
//! intents until the partition table adapter commits it.
//!
//! Children are owned by their parent node. Operations that need the
//! parent (free space, partition naming, size limits) are methods on the
//! disk taking the child by name, so the tree stays a plain owned
//! structure with no back-pointers.

use crate::error::{InstallerError, Result};
use crate::sizes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};

/// Largest partition number the planner will assign.
pub const MAX_PARTITION_NUMBER: u32 = 127;

/// Smallest partition the planner will create, in bytes.
pub const MIN_PARTITION_SIZE: u64 = 1_048_576;

// ============================================================================
// Closed vocabularies
// ============================================================================

/// Device kind as reported by lsblk's `type` column.
///
/// `Crypt` marks an encrypted partition; unknown kinds are preserved
/// verbatim so a rescan never loses information.
#[derive(Debug, Clone, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(from = "String", into = "String")]
pub enum DeviceKind {
    #[default]
    Disk,
    Part,
    Crypt,
    Rom,
    Loop,
    #[strum(default)]
    Unknown(String),
}

impl From<String> for DeviceKind {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Self::Unknown(s))
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.to_string()
    }
}

/// Filesystem kind for planned partitions.
///
/// Enumerated values are the ones the installer can create; anything
/// else found on existing partitions is carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(from = "String", into = "String")]
pub enum FsKind {
    Ext2,
    Ext3,
    Ext4,
    Vfat,
    Xfs,
    Btrfs,
    F2fs,
    Swap,
    #[strum(default)]
    Other(String),
}

impl From<String> for FsKind {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Self::Other(s))
    }
}

impl From<FsKind> for String {
    fn from(kind: FsKind) -> Self {
        kind.to_string()
    }
}

impl FsKind {
    /// Smallest size a filesystem of this kind can be created on.
    pub fn min_size(&self) -> u64 {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 8 * 1_048_576,
            Self::Vfat => 33 * 1_048_576,
            Self::Xfs => 16 * 1_048_576,
            Self::Btrfs => 114 * 1_048_576,
            Self::F2fs => 100 * 1_048_576,
            Self::Swap => 4 * 1_048_576,
            Self::Other(_) => MIN_PARTITION_SIZE,
        }
    }

    /// Longest label the filesystem's mkfs tool accepts.
    pub fn max_label_length(&self) -> usize {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 16,
            Self::Vfat => 11,
            Self::Xfs => 12,
            Self::Btrfs => 255,
            Self::F2fs => 16,
            Self::Swap => 15,
            Self::Other(_) => 16,
        }
    }
}

/// How much of a usable layout the device's partitions carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConfigStatus {
    /// No install mount points configured.
    #[strum(serialize = "No configuration")]
    None,
    /// Boot or root present, but not a complete layout.
    #[strum(serialize = "Partial configuration")]
    Partial,
    /// Boot, root and swap all present.
    #[strum(serialize = "Full configuration")]
    Full,
}

// ============================================================================
// Block device tree
// ============================================================================

/// A disk or partition node.
///
/// Field names follow lsblk's JSON output so the same struct deserializes
/// both the enumeration result and the install description's target
/// media entries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlockDevice {
    /// Kernel device name, e.g. `sda` or `nvme0n1p2`.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "maj:min", skip_serializing_if = "Option::is_none")]
    pub maj_min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Size in bytes.
    #[serde(deserialize_with = "de_size")]
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(rename = "fstype", skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<FsKind>,
    #[serde(rename = "mountpoint", skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// GPT partition name, distinct from the filesystem label.
    #[serde(rename = "partlabel", skip_serializing_if = "Option::is_none")]
    pub part_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Partition table type on a disk, e.g. `gpt` or `dos`. None for
    /// a blank disk or a partition.
    #[serde(rename = "pttype", skip_serializing_if = "Option::is_none")]
    pub pt_type: Option<String>,
    #[serde(rename = "rm", deserialize_with = "de_bool")]
    pub removable: bool,
    #[serde(rename = "ro", deserialize_with = "de_bool")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockDevice>,
    /// Came from interactive or config input rather than enumeration.
    #[serde(skip)]
    pub user_defined: bool,
    /// Pending intent: create this partition on commit.
    #[serde(skip)]
    pub make_partition: bool,
    /// Pending intent: create this partition's filesystem on commit.
    #[serde(skip)]
    pub format_partition: bool,
}

// lsblk emits byte counts as numbers on current util-linux and as
// quoted strings on older releases; accept both.
fn de_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// Same story for the rm/ro flags: bool, 0/1, or "0"/"1".
fn de_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Num(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Num(n) => n != 0,
        Raw::Text(s) => matches!(s.trim(), "1" | "true"),
    })
}

impl BlockDevice {
    /// Build a planned partition, not yet written to disk.
    pub fn new_partition(size: u64, fs_type: FsKind, mount_point: Option<&str>) -> Self {
        Self {
            size,
            kind: DeviceKind::Part,
            fs_type: Some(fs_type),
            mount_point: mount_point.map(str::to_string),
            user_defined: true,
            make_partition: true,
            format_partition: true,
            ..Self::default()
        }
    }

    /// Absolute device node path, e.g. `/dev/sda1`.
    pub fn device_file(&self) -> PathBuf {
        PathBuf::from(format!("/dev/{}", self.name))
    }

    /// Stable identifier suitable for fstab entries: label, then UUID,
    /// then the device node path.
    pub fn device_id(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.is_empty()) {
            format!("LABEL={}", label)
        } else if let Some(uuid) = self.uuid.as_deref().filter(|u| !u.is_empty()) {
            format!("UUID={}", uuid)
        } else {
            self.device_file().display().to_string()
        }
    }

    pub fn is_disk(&self) -> bool {
        self.kind == DeviceKind::Disk
    }

    pub fn is_partition(&self) -> bool {
        matches!(self.kind, DeviceKind::Part | DeviceKind::Crypt)
    }

    /// Identity match used to re-resolve a device after a rescan.
    pub fn equals(&self, other: &BlockDevice) -> bool {
        self.serial == other.serial && self.name == other.name
    }

    /// A user-facing one-line description of the device.
    pub fn friendly_name(&self) -> String {
        let model = self.model.as_deref().unwrap_or("").trim();
        if model.is_empty() {
            format!("{} ({})", self.name, sizes::human_readable(self.size))
        } else {
            format!(
                "{} {} ({})",
                self.name,
                model,
                sizes::human_readable(self.size)
            )
        }
    }

    // ------------------------------------------------------------------
    // Partition naming
    // ------------------------------------------------------------------

    /// Separator between disk name and partition number. Disks whose
    /// name ends in a digit (nvme0n1, mmcblk0, loop0) need a `p`.
    fn partition_separator(&self) -> &'static str {
        if self.name.ends_with(|c: char| c.is_ascii_digit()) {
            "p"
        } else {
            ""
        }
    }

    /// Device name for partition `number` on this disk.
    pub fn partition_name(&self, number: u32) -> String {
        format!("{}{}{}", self.name, self.partition_separator(), number)
    }

    /// Partition number parsed from a child's name, if any.
    fn child_number(child_name: &str) -> Option<u32> {
        let digits: String = child_name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }

    /// Lowest unused partition number on this disk.
    pub fn next_partition_number(&self) -> Result<u32> {
        let used: Vec<u32> = self
            .children
            .iter()
            .filter_map(|c| Self::child_number(&c.name))
            .collect();

        for number in 1..=MAX_PARTITION_NUMBER {
            if !used.contains(&number) {
                return Ok(number);
            }
        }

        Err(InstallerError::storage(format!(
            "no free partition number on {}",
            self.name
        )))
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    /// Append a partition, assigning it the next free number's device
    /// name unless it already carries one.
    pub fn add_child(&mut self, mut child: BlockDevice) -> Result<()> {
        if child.name.is_empty() {
            child.name = self.partition_name(self.next_partition_number()?);
        }

        if self.total_children_size() + child.size > self.size {
            return Err(InstallerError::storage(format!(
                "partition {} ({}) does not fit on {} (free {})",
                child.name,
                sizes::human_readable(child.size),
                self.name,
                sizes::human_readable(self.free_space()),
            )));
        }

        self.children.push(child);
        Ok(())
    }

    /// Detach a child by name, returning it so its span can be treated
    /// as reclaimed free space.
    pub fn remove_partition(&mut self, name: &str) -> Option<BlockDevice> {
        let idx = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(idx))
    }

    // ------------------------------------------------------------------
    // Accounting
    // ------------------------------------------------------------------

    /// Sum of the children's sizes.
    pub fn total_children_size(&self) -> u64 {
        self.children.iter().map(|c| c.size).sum()
    }

    /// Unallocated bytes on this device.
    pub fn free_space(&self) -> u64 {
        self.size.saturating_sub(self.total_children_size())
    }

    /// Upper bound for resizing `child_name`: its current size plus
    /// whatever is still unallocated on the disk.
    pub fn max_partition_size(&self, child_name: &str) -> Option<u64> {
        let child = self.children.iter().find(|c| c.name == child_name)?;
        Some(child.size + self.free_space())
    }

    /// Whether any partition carries (or will carry) a swap filesystem.
    pub fn device_has_swap(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.fs_type == Some(FsKind::Swap))
    }

    fn child_with_mount(&self, mount: &str) -> Option<&BlockDevice> {
        self.children
            .iter()
            .find(|c| c.mount_point.as_deref() == Some(mount))
    }

    /// How complete the configured layout is.
    ///
    /// Only a vfat `/boot` counts; anything else fails validation
    /// anyway and must not make a layout look more complete.
    pub fn configured_status(&self) -> ConfigStatus {
        let has_root = self.child_with_mount("/").is_some();
        let has_boot = self
            .child_with_mount("/boot")
            .is_some_and(|c| c.fs_type == Some(FsKind::Vfat));
        let has_swap = self.device_has_swap();

        if has_root && has_boot && has_swap {
            ConfigStatus::Full
        } else if has_root || has_boot {
            ConfigStatus::Partial
        } else {
            ConfigStatus::None
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check the planned layout is installable.
    pub fn validate(&self) -> Result<()> {
        let mut roots = 0;

        for child in &self.children {
            if child.mount_point.as_deref() == Some("/") {
                roots += 1;
            }

            if let Some(fs) = &child.fs_type {
                if *fs == FsKind::Swap && child.mount_point.is_some() {
                    return Err(InstallerError::config(format!(
                        "swap partition {} may not have a mount point",
                        child.name
                    )));
                }

                if child.format_partition && child.size < fs.min_size() {
                    return Err(InstallerError::config(format!(
                        "partition {} ({}) is below the {} minimum of {}",
                        child.name,
                        sizes::human_readable(child.size),
                        fs,
                        sizes::human_readable(fs.min_size()),
                    )));
                }
            }

            if child.mount_point.as_deref() == Some("/boot") {
                if child.fs_type != Some(FsKind::Vfat) {
                    return Err(InstallerError::config(format!(
                        "/boot partition {} must be vfat",
                        child.name
                    )));
                }
                if child.kind == DeviceKind::Crypt {
                    return Err(InstallerError::config(format!(
                        "/boot partition {} may not be encrypted",
                        child.name
                    )));
                }
            }
        }

        if roots == 0 {
            return Err(InstallerError::config(format!(
                "no root (\"/\") partition configured on {}",
                self.name
            )));
        }
        if roots > 1 {
            return Err(InstallerError::config(format!(
                "multiple root partitions configured on {}",
                self.name
            )));
        }

        if self.total_children_size() > self.size {
            return Err(InstallerError::storage(format!(
                "partitions on {} exceed the device size",
                self.name
            )));
        }

        Ok(())
    }
}
