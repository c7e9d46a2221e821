//! Device enumeration
//!
//! Builds the block device model from `lsblk` JSON output. Enumeration
//! is destructive to the model: a rescan replaces every node, so planned
//! (user-defined) layouts are merged back onto the devices that still
//! exist afterwards.

use crate::cmdio;
use crate::error::Result;
use crate::storage::block_device::{BlockDevice, DeviceKind, FsKind};
use log::debug;
use serde::Deserialize;

#[derive(Deserialize)]
struct LsblkDoc {
    blockdevices: Vec<BlockDevice>,
}

/// List the machine's block devices.
///
/// Excludes ram, floppy and cd devices at the lsblk level, then keeps
/// only disks that are candidates for installation.
pub fn list_available() -> Result<Vec<BlockDevice>> {
    let output = cmdio::run(&["lsblk", "--exclude", "1,2,11", "-J", "-b", "-O"])?;
    output.ensure_success("lsblk")?;
    Ok(parse_lsblk(&output.stdout)?
        .into_iter()
        .filter(is_available)
        .collect())
}

/// Parse an `lsblk -J -b -O` document into the model.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let doc: LsblkDoc = serde_json::from_str(json)?;
    Ok(doc.blockdevices)
}

fn holds_live_media(device: &BlockDevice) -> bool {
    device.fs_type == Some(FsKind::Other("squashfs".to_string()))
        || device.mount_point.is_some()
        || device.children.iter().any(holds_live_media)
}

/// Whether a device can be offered as an install candidate.
///
/// Mounted devices and devices carrying the live image are in use by
/// the running system and are never candidates.
pub fn is_available(device: &BlockDevice) -> bool {
    if device.kind != DeviceKind::Disk || device.read_only {
        return false;
    }
    if holds_live_media(device) {
        debug!("{}: in use, not an install candidate", device.name);
        return false;
    }
    true
}

/// Carry planned layouts from a previous scan onto a fresh one.
///
/// A device in `fresh` that matches (by serial and name) an old device
/// holding a user-defined plan keeps the old node, pending intents and
/// all. Devices that vanished drop their plans with them.
pub fn merge_user_defined(old: &[BlockDevice], fresh: Vec<BlockDevice>) -> Vec<BlockDevice> {
    fresh
        .into_iter()
        .map(|device| {
            match old.iter().find(|o| {
                o.equals(&device)
                    && (o.user_defined || o.children.iter().any(|c| c.make_partition))
            }) {
                Some(planned) => planned.clone(),
                None => device,
            }
        })
        .collect()
}

/// Re-enumerate devices, preserving user-defined plans where possible.
pub fn rescan(current: &[BlockDevice]) -> Result<Vec<BlockDevice>> {
    let fresh = list_available()?;
    Ok(merge_user_defined(current, fresh))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK_SAMPLE: &str = r#"{
        "blockdevices": [
            {"name": "sda", "maj:min": "8:0", "rm": false, "size": 500107862016,
             "ro": false, "type": "disk", "serial": "S3Z1NB0K",
             "model": "Samsung SSD 860", "pttype": "gpt",
             "children": [
                {"name": "sda1", "maj:min": "8:1", "rm": false, "size": 157286400,
                 "ro": false, "type": "part", "fstype": "vfat",
                 "mountpoint": null}
             ]},
            {"name": "sdb", "maj:min": "8:16", "rm": true, "size": 8004304896,
             "ro": false, "type": "disk", "serial": "USB9",
             "children": [
                {"name": "sdb1", "maj:min": "8:17", "rm": true, "size": 8000000000,
                 "ro": false, "type": "part", "fstype": "squashfs",
                 "mountpoint": "/run/initramfs/live"}
             ]}
        ]
    }"#;

    #[test]
    fn test_parse_and_filter() {
        let devices = parse_lsblk(LSBLK_SAMPLE).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial.as_deref(), Some("S3Z1NB0K"));
        assert!(devices[1].removable);

        let available: Vec<_> = devices.into_iter().filter(is_available).collect();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "sda");
    }

    #[test]
    fn test_mounted_disk_not_available() {
        let mut devices = parse_lsblk(LSBLK_SAMPLE).unwrap();
        devices[0].children[0].mount_point = Some("/mnt".to_string());
        assert!(!is_available(&devices[0]));
    }

    #[test]
    fn test_merge_keeps_planned_device() {
        let devices = parse_lsblk(LSBLK_SAMPLE).unwrap();
        let mut planned = devices[0].clone();
        planned.children.clear();
        planned
            .add_child(BlockDevice::new_partition(
                9000 * 1_048_576,
                FsKind::Ext4,
                Some("/"),
            ))
            .unwrap();

        let merged = merge_user_defined(&[planned.clone()], devices.clone());
        assert_eq!(merged[0].children.len(), 1);
        assert!(merged[0].children[0].make_partition);

        // Unplanned devices come from the fresh scan untouched.
        assert_eq!(merged[1].name, "sdb");
    }

    #[test]
    fn test_merge_drops_plan_for_missing_device() {
        let devices = parse_lsblk(LSBLK_SAMPLE).unwrap();
        let mut planned = devices[0].clone();
        planned.serial = Some("GONE".to_string());
        planned.user_defined = true;

        let merged = merge_user_defined(&[planned], devices);
        assert!(!merged[0].user_defined);
    }
}
