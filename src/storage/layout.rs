//! Standard layout generator
//!
//! Synthesizes the default boot/swap/root geometry for a target region.
//! Boot and swap are reserved first at fixed/policy sizes; root takes
//! everything that remains, so it can never be starved by the others.

use crate::error::{InstallerError, Result};
use crate::sizes;
use crate::storage::block_device::{BlockDevice, FsKind};
use crate::storage::part_table::FIRST_PARTITION_START;
use crate::storage::targets::InstallTarget;
use log::info;
use std::fs;

/// Boot partition size: 150MB, vfat, mounted at /boot.
pub const BOOT_SIZE: u64 = 150_000_000;

/// Smallest swap partition the policy will produce.
pub const SWAP_MIN_SIZE: u64 = 256_000_000;

/// Largest swap partition the policy will produce (2GiB).
pub const SWAP_MAX_SIZE: u64 = 2_147_483_648;

/// Smallest root filesystem a minimal install fits in.
pub const ROOT_MIN_SIZE: u64 = 4_000_000_000;

/// Smallest region an install can target at all.
pub fn min_install_size() -> u64 {
    BOOT_SIZE + ROOT_MIN_SIZE
}

/// Swap size policy: a quarter of RAM, capped at 2GiB and at a
/// twentieth of the region budget, with a 256MB floor.
pub fn swap_size(budget: u64, ram_total: u64) -> u64 {
    let capped = (ram_total / 4).min(SWAP_MAX_SIZE).min(budget / 20);
    capped.max(SWAP_MIN_SIZE)
}

/// Total RAM in bytes, from /proc/meminfo.
pub fn ram_total() -> Result<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo")?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .map_err(|_| InstallerError::storage("unparsable MemTotal in /proc/meminfo"))?;
            return Ok(kb * 1024);
        }
    }
    Err(InstallerError::storage("no MemTotal in /proc/meminfo"))
}

/// Append the standard boot/swap/root partitions for `target` to
/// `device`, as pending intents.
///
/// Whole-disk targets budget the full disk minus the leading alignment
/// gap; partial targets budget exactly their free region. Swap is
/// skipped when the device already carries one.
pub fn standard_partitions(
    device: &mut BlockDevice,
    target: &InstallTarget,
    ram: u64,
) -> Result<()> {
    let budget = if target.whole_disk {
        device.size.saturating_sub(FIRST_PARTITION_START)
    } else {
        target.free_size()
    };

    if budget < min_install_size() {
        return Err(InstallerError::storage(format!(
            "{} available on {}, {} required",
            sizes::human_readable(budget),
            device.name,
            sizes::human_readable(min_install_size()),
        )));
    }

    let mut remaining = budget;

    device.add_child(BlockDevice::new_partition(
        BOOT_SIZE,
        FsKind::Vfat,
        Some("/boot"),
    ))?;
    remaining -= BOOT_SIZE;

    if !device.device_has_swap() {
        let swap = swap_size(budget, ram);
        device.add_child(BlockDevice::new_partition(swap, FsKind::Swap, None))?;
        remaining -= swap;
    }

    device.add_child(BlockDevice::new_partition(
        remaining,
        FsKind::Ext4,
        Some("/"),
    ))?;

    info!(
        "standard layout on {}: boot {}, root {}",
        device.name,
        sizes::human_readable(BOOT_SIZE),
        sizes::human_readable(remaining),
    );

    Ok(())
}
