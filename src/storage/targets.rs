//! Install target discovery
//!
//! Scans the enumerated block devices and classifies where an install
//! could go. Classification is pure (device model + parsed partition
//! table in, targets out); the `find_*` wrappers do the parted reads.
//!
//! Targets are immutable values. After any rescan a fresh discovery
//! pass is required, and [`Selection::revalidate`] drops state that
//! points at devices that no longer exist.

use crate::error::Result;
use crate::sizes;
use crate::storage::block_device::{BlockDevice, DeviceKind, FsKind};
use crate::storage::layout;
use crate::storage::part_table::PartTable;
use log::{debug, warn};
use strum::Display;

/// Disks with more partitions than this are not offered as safe
/// targets; the table is effectively full for our purposes.
const MAX_USABLE_PARTITIONS: usize = 125;

/// GPT partition names carrying install intent contain this token.
const ADVANCED_LABEL_TOKEN: &str = "keel";

/// Marker preceding the mount path in a `KEEL_MNT_<path>` name.
const MNT_MARKER: &str = "MNT_";

/// A proposed installation region on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    /// Kernel device name of the disk.
    pub name: String,
    /// User-facing label.
    pub friendly: String,
    /// First byte of the usable region.
    pub free_start: u64,
    /// Byte just past the usable region.
    pub free_end: u64,
    /// The whole disk is ours to lay out.
    pub whole_disk: bool,
    /// The existing partition table will be destroyed.
    pub erase_disk: bool,
    /// Existing data may be lost.
    pub data_loss: bool,
    /// Partition roles were declared by on-disk partition names.
    pub advanced: bool,
    /// Hand-off to the external partition resizing flow.
    pub modify: bool,
    pub removable: bool,
}

impl InstallTarget {
    /// Bytes available in the target region.
    pub fn free_size(&self) -> u64 {
        self.free_end - self.free_start
    }
}

/// Overall installation mode the flow defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InstallMode {
    #[strum(serialize = "safe")]
    Safe,
    #[strum(serialize = "destructive")]
    Destructive,
}

fn target_base(device: &BlockDevice) -> InstallTarget {
    InstallTarget {
        name: device.name.clone(),
        friendly: device.friendly_name(),
        free_start: 0,
        free_end: device.size,
        whole_disk: false,
        erase_disk: false,
        data_loss: false,
        advanced: false,
        modify: false,
        removable: device.removable,
    }
}

/// Classify a device as a safe (no data loss) target, if it qualifies.
///
/// Qualifying disks carry a gpt table or no table at all, have room in
/// the partition table, and hold either no partitions (whole-disk
/// target) or a contiguous free gap large enough for a minimal install.
pub fn classify_safe(device: &BlockDevice, table: &PartTable) -> Option<InstallTarget> {
    if device.size < layout::min_install_size() {
        return None;
    }

    match device.pt_type.as_deref() {
        None | Some("") | Some("gpt") => {}
        Some(other) => {
            debug!("{}: {} table, not safe-installable", device.name, other);
            return None;
        }
    }

    if table.partition_count() > MAX_USABLE_PARTITIONS {
        return None;
    }

    let mut target = target_base(device);

    if table.partition_count() == 0 && device.children.is_empty() {
        target.whole_disk = true;
        return Some(target);
    }

    let gap = table.largest_contiguous_free_space(layout::min_install_size())?;
    target.free_start = gap.start;
    target.free_end = gap.end + 1;
    Some(target)
}

/// Classify a device as a destructive (erase everything) target.
///
/// Any disk large enough qualifies, regardless of content.
pub fn classify_destructive(device: &BlockDevice) -> Option<InstallTarget> {
    if device.size < layout::min_install_size() {
        return None;
    }

    let mut target = target_base(device);
    target.whole_disk = true;
    target.erase_disk = true;
    target.data_loss = true;
    Some(target)
}

/// Apply the intent a GPT partition name declares, if it declares one.
///
/// Returns true when the name assigned a role. Names are `_`-separated
/// tokens; nothing is honored unless the `KEEL` token is present.
fn apply_advanced_label(part: &mut BlockDevice) -> bool {
    let Some(label) = part.part_label.clone() else {
        return false;
    };
    let tokens: Vec<String> = label.split('_').map(|t| t.to_lowercase()).collect();
    if !tokens.iter().any(|t| t == ADVANCED_LABEL_TOKEN) {
        return false;
    }

    let mut matched = false;
    for token in &tokens {
        match token.as_str() {
            "boot" => {
                part.mount_point = Some("/boot".to_string());
                if part.fs_type.is_none() {
                    part.fs_type = Some(FsKind::Vfat);
                    part.format_partition = true;
                }
                if part.kind == DeviceKind::Crypt {
                    warn!("{}: /boot can not be encrypted, treating as plain", part.name);
                    part.kind = DeviceKind::Part;
                }
                matched = true;
            }
            "root" => {
                part.mount_point = Some("/".to_string());
                if part.fs_type.is_none() {
                    part.fs_type = Some(FsKind::Ext4);
                    part.format_partition = true;
                }
                matched = true;
            }
            "swap" => {
                if part.fs_type.is_none() {
                    part.fs_type = Some(FsKind::Swap);
                    part.format_partition = true;
                }
                part.mount_point = None;
                matched = true;
            }
            "mnt" => {
                let Some((_, raw)) = label.split_once(MNT_MARKER) else {
                    continue;
                };
                let path = raw.trim_end_matches("_F");
                if !path.starts_with('/') {
                    warn!(
                        "{}: mount path {} in name {} is not absolute, ignoring",
                        part.name, path, label
                    );
                    continue;
                }
                part.mount_point = Some(path.to_string());
                if part.fs_type.is_none() {
                    part.fs_type = Some(FsKind::Ext4);
                    part.format_partition = true;
                }
                matched = true;
            }
            "f" => {
                part.format_partition = true;
            }
            _ => {}
        }
    }

    if matched {
        part.user_defined = true;
    }
    matched
}

/// Configure a device from intent-bearing partition names, if any.
///
/// A partition whose GPT name contains the `KEEL` token declares its
/// own role: `KEEL_BOOT`, `KEEL_ROOT`, `KEEL_SWAP`, or
/// `KEEL_MNT_<absolute path>`, with an `_F` suffix forcing a reformat.
/// Filesystem kinds default to vfat for `/boot`, swap for swap, ext4
/// elsewhere, and a defaulted kind is always formatted. Returns the
/// configured media clone and its target when at least one partition
/// declared a role.
pub fn classify_advanced(device: &BlockDevice) -> Option<(BlockDevice, InstallTarget)> {
    if !device.is_disk() {
        return None;
    }

    let mut media = device.clone();
    let mut matched = false;
    for child in &mut media.children {
        matched |= apply_advanced_label(child);
    }
    if !matched {
        return None;
    }

    let mut target = target_base(device);
    target.advanced = true;
    target.data_loss = media.children.iter().any(|c| c.format_partition);
    Some((media, target))
}

/// Scan for devices whose partitions were pre-named for install.
pub fn find_advanced_targets(devices: &[BlockDevice]) -> Vec<(BlockDevice, InstallTarget)> {
    let found: Vec<_> = devices.iter().filter_map(classify_advanced).collect();
    for (_, target) in &found {
        debug!("advanced target: {}", target.name);
    }
    found
}

/// Classify a device for the partition-shrinking hand-off.
///
/// Only partitioned disks with a resizable table type qualify.
pub fn classify_modify(device: &BlockDevice, table: &PartTable) -> Option<InstallTarget> {
    if table.partition_count() == 0 {
        return None;
    }
    match device.pt_type.as_deref() {
        Some("gpt") | Some("dos") | Some("msdos") => {}
        _ => return None,
    }

    let mut target = target_base(device);
    target.modify = true;
    target.data_loss = true;
    Some(target)
}

/// Order targets: non-removable first, whole-disk next, then by the
/// size of the usable region, largest first.
pub fn sort_targets(targets: &mut [InstallTarget]) {
    targets.sort_by(|a, b| {
        a.removable
            .cmp(&b.removable)
            .then(b.whole_disk.cmp(&a.whole_disk))
            .then(b.free_size().cmp(&a.free_size()))
    });
}

/// Scan for safe install targets, sorted by preference.
pub fn find_safe_targets(devices: &[BlockDevice]) -> Result<Vec<InstallTarget>> {
    let mut found = Vec::new();
    for device in devices {
        let table = PartTable::read(device)?;
        if let Some(target) = classify_safe(device, &table) {
            debug!(
                "safe target: {} ({} usable)",
                target.name,
                sizes::human_readable(target.free_size())
            );
            found.push(target);
        }
    }
    sort_targets(&mut found);
    Ok(found)
}

/// Scan for destructive install targets, sorted by preference.
pub fn find_destructive_targets(devices: &[BlockDevice]) -> Vec<InstallTarget> {
    let mut found: Vec<_> = devices.iter().filter_map(classify_destructive).collect();
    sort_targets(&mut found);
    found
}

/// Scan for disk-modification targets.
pub fn find_modify_targets(devices: &[BlockDevice]) -> Result<Vec<InstallTarget>> {
    let mut found = Vec::new();
    for device in devices {
        let table = PartTable::read(device)?;
        if let Some(target) = classify_modify(device, &table) {
            found.push(target);
        }
    }
    sort_targets(&mut found);
    Ok(found)
}

/// Pick the default mode: safe when anything safe exists, destructive
/// (with a warning) otherwise.
pub fn default_mode(safe_targets: &[InstallTarget]) -> InstallMode {
    if safe_targets.is_empty() {
        warn!("no safe install target found, defaulting to destructive mode");
        InstallMode::Destructive
    } else {
        InstallMode::Safe
    }
}

/// The flow's current target choice.
///
/// Holds the device the user (or the automatic flow) is working with
/// and the media configured for install. Both are invalidated when the
/// active device disappears from a rescan.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Serial of the device being configured.
    pub active_serial: Option<String>,
    /// Configured target media, consumed by the controller.
    pub medias: Vec<BlockDevice>,
}

impl Selection {
    /// Drop stale state after a rescan. Returns true when the active
    /// device is still present (or nothing was selected).
    pub fn revalidate(&mut self, devices: &[BlockDevice]) -> bool {
        let Some(serial) = self.active_serial.as_deref() else {
            return true;
        };

        let present = devices
            .iter()
            .any(|d| d.serial.as_deref() == Some(serial));
        if !present {
            warn!("active device (serial {}) vanished, clearing selection", serial);
            self.active_serial = None;
            self.medias.clear();
        }
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_device::{DeviceKind, FsKind};
    use crate::storage::part_table::PartedPartition;

    fn disk(name: &str, size: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            serial: Some(format!("SER-{}", name)),
            size,
            kind: DeviceKind::Disk,
            ..BlockDevice::default()
        }
    }

    fn free_row(start: u64, end: u64) -> PartedPartition {
        PartedPartition {
            number: 0,
            start,
            end,
            size: end - start + 1,
            file_system: "free".to_string(),
            name: String::new(),
            flags: String::new(),
        }
    }

    fn part_row(number: u32, start: u64, end: u64) -> PartedPartition {
        PartedPartition {
            number,
            start,
            end,
            size: end - start + 1,
            file_system: "ext4".to_string(),
            name: String::new(),
            flags: String::new(),
        }
    }

    const BIG: u64 = 500_000_000_000;

    #[test]
    fn test_blank_disk_is_whole_disk_safe_target() {
        let d = disk("sda", BIG);
        let table = PartTable::default();

        let target = classify_safe(&d, &table).unwrap();
        assert!(target.whole_disk);
        assert!(!target.data_loss);
        assert!(!target.erase_disk);
        assert_eq!(target.free_size(), BIG);
    }

    #[test]
    fn test_partitioned_disk_uses_largest_gap() {
        let mut d = disk("sda", BIG);
        d.pt_type = Some("gpt".to_string());
        d.children.push(BlockDevice {
            name: "sda1".to_string(),
            size: 100_000_000_000,
            kind: DeviceKind::Part,
            fs_type: Some(FsKind::Ext4),
            ..BlockDevice::default()
        });

        let mut table = PartTable::default();
        table.parts.push(part_row(1, 1_048_576, 100_000_000_000));
        table.parts.push(free_row(100_000_000_001, BIG - 1));

        let target = classify_safe(&d, &table).unwrap();
        assert!(!target.whole_disk);
        assert_eq!(target.free_start, 100_000_000_001);
        assert_eq!(target.free_end, BIG);
    }

    #[test]
    fn test_small_or_foreign_disks_excluded_from_safe() {
        let small = disk("sdb", 1_000_000);
        assert!(classify_safe(&small, &PartTable::default()).is_none());

        let mut dos = disk("sdc", BIG);
        dos.pt_type = Some("dos".to_string());
        assert!(classify_safe(&dos, &PartTable::default()).is_none());
    }

    #[test]
    fn test_destructive_target_regardless_of_content() {
        let mut d = disk("sda", BIG);
        d.pt_type = Some("dos".to_string());
        d.children.push(BlockDevice {
            name: "sda1".to_string(),
            size: BIG,
            kind: DeviceKind::Part,
            ..BlockDevice::default()
        });

        let target = classify_destructive(&d).unwrap();
        assert!(target.erase_disk);
        assert!(target.data_loss);
        assert!(target.whole_disk);

        assert!(classify_destructive(&disk("tiny", 1_000_000)).is_none());
    }

    #[test]
    fn test_modify_needs_partitions_and_resizable_table() {
        let mut d = disk("sda", BIG);
        d.pt_type = Some("gpt".to_string());

        let mut table = PartTable::default();
        assert!(classify_modify(&d, &table).is_none());

        table.parts.push(part_row(1, 0, 999));
        let target = classify_modify(&d, &table).unwrap();
        assert!(target.modify);
        assert!(target.data_loss);
    }

    fn named_part(name: &str, part_label: &str, size: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            size,
            kind: DeviceKind::Part,
            part_label: Some(part_label.to_string()),
            ..BlockDevice::default()
        }
    }

    #[test]
    fn test_advanced_names_assign_roles_and_defaults() {
        let mut d = disk("sda", BIG);
        d.pt_type = Some("gpt".to_string());
        d.children.push(named_part("sda1", "KEEL_BOOT", 150_000_000));
        d.children.push(named_part("sda2", "KEEL_SWAP", 2_000_000_000));
        d.children.push(named_part("sda3", "KEEL_ROOT", 100_000_000_000));
        d.children.push(named_part("sda4", "KEEL_MNT_/srv", 10_000_000_000));

        let (media, target) = classify_advanced(&d).unwrap();
        assert!(target.advanced);
        assert!(target.data_loss);

        let boot = &media.children[0];
        assert_eq!(boot.mount_point.as_deref(), Some("/boot"));
        assert_eq!(boot.fs_type, Some(FsKind::Vfat));
        assert!(boot.format_partition);

        let swap = &media.children[1];
        assert_eq!(swap.fs_type, Some(FsKind::Swap));
        assert!(swap.mount_point.is_none());

        let root = &media.children[2];
        assert_eq!(root.mount_point.as_deref(), Some("/"));
        assert_eq!(root.fs_type, Some(FsKind::Ext4));

        let extra = &media.children[3];
        assert_eq!(extra.mount_point.as_deref(), Some("/srv"));
        assert_eq!(extra.fs_type, Some(FsKind::Ext4));
    }

    #[test]
    fn test_advanced_existing_fs_kept_unless_forced() {
        let mut d = disk("sda", BIG);
        let mut root = named_part("sda1", "KEEL_ROOT", 100_000_000_000);
        root.fs_type = Some(FsKind::Xfs);
        d.children.push(root);

        let (media, target) = classify_advanced(&d).unwrap();
        assert_eq!(media.children[0].fs_type, Some(FsKind::Xfs));
        assert!(!media.children[0].format_partition);
        assert!(!target.data_loss);

        d.children[0].part_label = Some("KEEL_ROOT_F".to_string());
        let (media, target) = classify_advanced(&d).unwrap();
        assert_eq!(media.children[0].fs_type, Some(FsKind::Xfs));
        assert!(media.children[0].format_partition);
        assert!(target.data_loss);
    }

    #[test]
    fn test_advanced_requires_the_name_token() {
        let mut d = disk("sda", BIG);
        d.children.push(named_part("sda1", "BOOT", 150_000_000));
        d.children.push(named_part("sda2", "my-data", 100_000_000_000));
        assert!(classify_advanced(&d).is_none());

        // Relative extra mount paths are refused.
        d.children.push(named_part("sda3", "KEEL_MNT_srv", 10_000_000_000));
        assert!(classify_advanced(&d).is_none());

        assert!(find_advanced_targets(&[d]).is_empty());
    }

    #[test]
    fn test_advanced_boot_is_never_encrypted() {
        let mut d = disk("sda", BIG);
        let mut boot = named_part("sda1", "keel_boot", 150_000_000);
        boot.kind = DeviceKind::Crypt;
        d.children.push(boot);

        let (media, _) = classify_advanced(&d).unwrap();
        assert_eq!(media.children[0].kind, DeviceKind::Part);
        // The scanned device itself is untouched.
        assert_eq!(d.children[0].kind, DeviceKind::Crypt);
        assert!(d.children[0].mount_point.is_none());
    }

    #[test]
    fn test_sort_prefers_fixed_whole_disks() {
        let mut usb = classify_destructive(&disk("sdb", BIG)).unwrap();
        usb.removable = true;
        let fixed_small = classify_destructive(&disk("sdc", BIG / 2)).unwrap();
        let fixed_big = classify_destructive(&disk("sda", BIG)).unwrap();

        let mut targets = vec![usb.clone(), fixed_small.clone(), fixed_big.clone()];
        sort_targets(&mut targets);

        assert_eq!(targets[0].name, "sda");
        assert_eq!(targets[1].name, "sdc");
        assert_eq!(targets[2].name, "sdb");
    }

    #[test]
    fn test_default_mode() {
        let safe = vec![classify_safe(&disk("sda", BIG), &PartTable::default()).unwrap()];
        assert_eq!(default_mode(&safe), InstallMode::Safe);
        assert_eq!(default_mode(&[]), InstallMode::Destructive);
    }

    #[test]
    fn test_selection_cleared_when_device_vanishes() {
        let mut selection = Selection {
            active_serial: Some("SER-sda".to_string()),
            medias: vec![disk("sda", BIG)],
        };

        assert!(selection.revalidate(&[disk("sda", BIG), disk("sdb", BIG)]));
        assert!(!selection.medias.is_empty());

        assert!(!selection.revalidate(&[disk("sdb", BIG)]));
        assert!(selection.active_serial.is_none());
        assert!(selection.medias.is_empty());
    }

    #[test]
    fn test_empty_selection_survives_revalidate() {
        let mut selection = Selection::default();
        assert!(selection.revalidate(&[]));
    }
}
