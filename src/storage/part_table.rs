//! Partition table adapter
//!
//! Wraps the external `parted` tool. Reads produce a [`PartTable`]: the
//! numbered partitions plus the unallocated gaps between them, both as
//! [`PartedPartition`] rows (a gap has `number == 0`). Writes commit the
//! pending partitions recorded on a [`BlockDevice`] and bind the numbers
//! parted assigned back to device node names.
//!
//! A failed write leaves the disk in an indeterminate state, so every
//! error out of here is fatal to the install.

use crate::cmdio;
use crate::error::{InstallerError, Result};
use crate::storage::block_device::{BlockDevice, FsKind, MIN_PARTITION_SIZE};
use log::{debug, info};

/// Start offset of the first partition on a wiped disk, in bytes.
pub const FIRST_PARTITION_START: u64 = 1_048_576;

/// One row of the on-disk partition table.
///
/// Read-only snapshot; speculative edits work on clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartedPartition {
    /// Partition number; 0 denotes unallocated free space.
    pub number: u32,
    /// First byte of the region.
    pub start: u64,
    /// Last byte of the region, inclusive.
    pub end: u64,
    /// Region size in bytes.
    pub size: u64,
    /// Filesystem as reported by parted, empty when unknown.
    pub file_system: String,
    /// GPT partition name, empty when unset.
    pub name: String,
    /// Flags string, e.g. `boot, esp`.
    pub flags: String,
}

impl PartedPartition {
    pub fn is_free(&self) -> bool {
        self.number == 0
    }
}

/// Parsed partition table of one disk: partitions and free gaps,
/// ordered by start offset.
#[derive(Debug, Clone, Default)]
pub struct PartTable {
    /// Device node the table was read from.
    pub device: String,
    /// Partition table type, e.g. `gpt`. Empty for an unlabeled disk.
    pub label: String,
    pub parts: Vec<PartedPartition>,
}

fn parse_bytes(field: &str) -> Result<u64> {
    field
        .trim()
        .trim_end_matches('B')
        .parse()
        .map_err(|_| InstallerError::storage(format!("parted: bad byte field: {}", field)))
}

impl PartTable {
    /// Read the partition table of `disk` via parted.
    pub fn read(disk: &BlockDevice) -> Result<Self> {
        let dev = disk.device_file().display().to_string();
        let output = cmdio::run(&[
            "parted",
            "--machine",
            "--script",
            &dev,
            "unit",
            "B",
            "print",
            "free",
        ])?;

        // parted exits non-zero on a blank disk ("unrecognised disk
        // label") but that is a valid state for us.
        if !output.success && !output.stderr.contains("unrecognised disk label") {
            output.ensure_success("parted print")?;
        }

        Self::parse(&dev, &output.stdout)
    }

    /// Parse `parted --machine ... unit B print free` output.
    pub fn parse(device: &str, output: &str) -> Result<Self> {
        let mut table = PartTable {
            device: device.to_string(),
            ..PartTable::default()
        };

        for line in output.lines() {
            let line = line.trim().trim_end_matches(';');
            if line.is_empty() || line == "BYT" {
                continue;
            }

            let fields: Vec<&str> = line.split(':').collect();

            // Device summary row: path:size:transport:lsec:psec:label:model:
            if fields[0].starts_with("/dev/") {
                if fields.len() > 5 {
                    table.label = fields[5].to_string();
                }
                continue;
            }

            match fields.len() {
                // number:start:end:size:fs:name:flags
                7 => table.parts.push(PartedPartition {
                    number: fields[0].parse().map_err(|_| {
                        InstallerError::storage(format!("parted: bad partition number: {}", line))
                    })?,
                    start: parse_bytes(fields[1])?,
                    end: parse_bytes(fields[2])?,
                    size: parse_bytes(fields[3])?,
                    file_system: fields[4].to_string(),
                    name: fields[5].to_string(),
                    flags: fields[6].to_string(),
                }),
                // number:start:end:size:free
                5 if fields[4].trim() == "free" => table.parts.push(PartedPartition {
                    number: 0,
                    start: parse_bytes(fields[1])?,
                    end: parse_bytes(fields[2])?,
                    size: parse_bytes(fields[3])?,
                    file_system: "free".to_string(),
                    name: String::new(),
                    flags: String::new(),
                }),
                _ => debug!("parted: skipping row: {}", line),
            }
        }

        table.parts.sort_by_key(|p| p.start);
        Ok(table)
    }

    /// Number of allocated partitions.
    pub fn partition_count(&self) -> usize {
        self.parts.iter().filter(|p| !p.is_free()).count()
    }

    /// First free gap large enough for `size` bytes.
    pub fn find_free(&self, size: u64) -> Option<&PartedPartition> {
        self.parts.iter().find(|p| p.is_free() && p.size >= size)
    }

    /// Largest free gap of at least `min` bytes.
    pub fn largest_contiguous_free_space(&self, min: u64) -> Option<&PartedPartition> {
        self.parts
            .iter()
            .filter(|p| p.is_free() && p.size >= min)
            .max_by_key(|p| p.size)
    }

    /// Total unallocated bytes.
    pub fn free_space(&self) -> u64 {
        self.parts.iter().filter(|p| p.is_free()).map(|p| p.size).sum()
    }

    /// Carve a new partition out of the free gap starting at
    /// `free_start`, consuming exactly `part.size` bytes from its front.
    ///
    /// The gap's remainder, whatever its size, stays in the table as
    /// free space. The new partition is appended to `disk`'s children
    /// with its assigned device name, which is also returned.
    pub fn add_from_free_partition(
        &mut self,
        disk: &mut BlockDevice,
        free_start: u64,
        mut part: BlockDevice,
    ) -> Result<String> {
        if part.size < MIN_PARTITION_SIZE {
            return Err(InstallerError::storage(format!(
                "partition size {} is below the minimum",
                part.size
            )));
        }

        let idx = self
            .parts
            .iter()
            .position(|p| p.is_free() && p.start == free_start)
            .ok_or_else(|| {
                InstallerError::storage(format!("no free region at offset {}", free_start))
            })?;
        let gap = self.parts[idx].clone();

        if part.size > gap.size {
            return Err(InstallerError::storage(format!(
                "partition needs {} but the free region holds {}",
                part.size, gap.size
            )));
        }

        let number = disk.next_partition_number()?;
        let name = disk.partition_name(number);
        part.name = name.clone();
        part.make_partition = true;

        let new_row = PartedPartition {
            number,
            start: gap.start,
            end: gap.start + part.size - 1,
            size: part.size,
            file_system: part
                .fs_type
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default(),
            name: String::new(),
            flags: String::new(),
        };

        let remainder = gap.size - part.size;
        self.parts.remove(idx);
        if remainder > 0 {
            self.parts.insert(
                idx,
                PartedPartition {
                    number: 0,
                    start: new_row.end + 1,
                    end: gap.end,
                    size: remainder,
                    file_system: "free".to_string(),
                    name: String::new(),
                    flags: String::new(),
                },
            );
        }
        self.parts.insert(idx, new_row);

        self.consolidate_free();
        disk.add_child(part)?;

        Ok(name)
    }

    /// Merge free gaps that touch each other into single entries.
    pub fn consolidate_free(&mut self) {
        self.parts.sort_by_key(|p| p.start);

        let mut merged: Vec<PartedPartition> = Vec::with_capacity(self.parts.len());
        for part in self.parts.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.is_free() && part.is_free() && part.start == last.end + 1 {
                    last.end = part.end;
                    last.size += part.size;
                    continue;
                }
            }
            merged.push(part);
        }
        self.parts = merged;
    }
}

fn parted_fs_name(fs: &FsKind) -> String {
    match fs {
        FsKind::Vfat => "fat32".to_string(),
        FsKind::Swap => "linux-swap".to_string(),
        other => other.to_string(),
    }
}

/// Commit the pending partitions on `disk` to the hardware.
///
/// With `wipe` set, a fresh gpt label replaces whatever the disk holds
/// first. `start_at` gives the byte offset for the first new partition;
/// on a wiped disk it defaults to 1MiB. After the mkpart calls the table
/// is re-read to bind the assigned numbers to device node names on the
/// children, and the ESP flag is set on the `/boot` partition.
pub fn write_partition_table(
    disk: &mut BlockDevice,
    wipe: bool,
    start_at: Option<u64>,
) -> Result<()> {
    let dev = disk.device_file().display().to_string();

    if wipe {
        info!("writing new gpt label to {}", dev);
        cmdio::run_and_log(
            "parted mklabel",
            &["parted", "--script", &dev, "mklabel", "gpt"],
        )?;
        disk.pt_type = Some("gpt".to_string());
        disk.children.retain(|c| c.make_partition);
    }

    let mut cursor = start_at.unwrap_or(FIRST_PARTITION_START);
    let mut created: Vec<(u64, usize)> = Vec::new();

    for (idx, child) in disk.children.iter().enumerate() {
        if !child.make_partition {
            continue;
        }

        let fs = child
            .fs_type
            .as_ref()
            .ok_or_else(|| {
                InstallerError::storage(format!("partition {} has no filesystem kind", child.name))
            })?
            .clone();

        let start = cursor;
        let end = start + child.size - 1;
        cursor = end + 1;

        cmdio::run_and_log(
            "parted mkpart",
            &[
                "parted",
                "--script",
                &dev,
                "unit",
                "B",
                "mkpart",
                "primary",
                &parted_fs_name(&fs),
                &format!("{}B", start),
                &format!("{}B", end),
            ],
        )?;

        created.push((start, idx));
    }

    if created.is_empty() {
        return Ok(());
    }

    // Let the kernel notice the new table before re-reading it.
    cmdio::run_and_log("partprobe", &["partprobe", &dev])?;

    let table = PartTable::read(disk)?;
    for (start, idx) in created {
        let row = table
            .parts
            .iter()
            .find(|p| !p.is_free() && p.start == start)
            .ok_or_else(|| {
                InstallerError::storage(format!(
                    "created partition at offset {} not found on re-read of {}",
                    start, dev
                ))
            })?;

        let name = disk.partition_name(row.number);
        disk.children[idx].name = name;
        disk.children[idx].make_partition = false;

        if disk.children[idx].mount_point.as_deref() == Some("/boot") {
            cmdio::run_and_log(
                "parted set esp",
                &[
                    "parted",
                    "--script",
                    &dev,
                    "set",
                    &row.number.to_string(),
                    "esp",
                    "on",
                ],
            )?;
        }
    }

    Ok(())
}
