//! Property-based tests for the storage planning engine.
//!
//! These pin down the arithmetic invariants the installer relies on:
//! partition accounting never leaks bytes, free-space carving consumes
//! exactly what was asked for, and mount ordering respects path
//! prefixes.

use keel::storage::block_device::{BlockDevice, DeviceKind, FsKind, MIN_PARTITION_SIZE};
use keel::storage::ops::sort_mount_points;
use keel::storage::part_table::{PartTable, PartedPartition};
use proptest::prelude::*;

fn disk(size: u64) -> BlockDevice {
    BlockDevice {
        name: "sda".to_string(),
        serial: Some("PROP-1".to_string()),
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

fn fs_strategy() -> impl Strategy<Value = FsKind> {
    prop_oneof![
        Just(FsKind::Ext4),
        Just(FsKind::Xfs),
        Just(FsKind::Btrfs),
        Just(FsKind::Swap),
        Just(FsKind::Vfat),
    ]
}

fn mount_point_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/".to_string()),
        Just("/boot".to_string()),
        Just("/home".to_string()),
        Just("/var".to_string()),
        Just("/var/log".to_string()),
        Just("/srv/data".to_string()),
    ]
}

proptest! {
    /// Children plus free space always equals the disk size, for any
    /// sequence of add and remove operations.
    #[test]
    fn partition_accounting_never_leaks(
        steps in prop::collection::vec((1u64..=512, any::<bool>(), fs_strategy()), 0..40)
    ) {
        let size = 1u64 << 40;
        let mut d = disk(size);

        for (units, remove, fs) in steps {
            if remove && !d.children.is_empty() {
                let name = d.children[0].name.clone();
                prop_assert!(d.remove_partition(&name).is_some());
            } else {
                let part_size = units * MIN_PARTITION_SIZE;
                if d.free_space() >= part_size {
                    d.add_child(BlockDevice::new_partition(part_size, fs, None)).unwrap();
                }
            }

            prop_assert_eq!(d.total_children_size() + d.free_space(), size);
        }
    }

    /// Carving a partition out of a free gap decreases free space by
    /// exactly the partition size, whatever the remainder.
    #[test]
    fn carving_consumes_exactly_the_requested_size(
        gap_units in 2u64..2000,
        carve_units in 1u64..2000,
        offset_units in 0u64..100,
    ) {
        prop_assume!(carve_units <= gap_units);

        let start = offset_units * MIN_PARTITION_SIZE;
        let gap = gap_units * MIN_PARTITION_SIZE;
        let carve = carve_units * MIN_PARTITION_SIZE;

        let mut table = PartTable::default();
        table.parts.push(free_row(start, start + gap - 1));
        let mut d = disk(start + gap);

        let before = table.free_space();
        let part = BlockDevice::new_partition(carve, FsKind::Ext4, Some("/"));
        table.add_from_free_partition(&mut d, start, part).unwrap();

        prop_assert_eq!(table.free_space(), before - carve);
        prop_assert_eq!(d.children.len(), 1);
        prop_assert_eq!(d.children[0].size, carve);

        // Rows stay disjoint and contiguous over the original gap.
        let mut cursor = start;
        for row in &table.parts {
            prop_assert_eq!(row.start, cursor);
            prop_assert_eq!(row.end - row.start + 1, row.size);
            cursor = row.end + 1;
        }
        prop_assert_eq!(cursor, start + gap);
    }

    /// After sorting, no mount point precedes one of its own proper
    /// prefixes, and `/` always comes first when present.
    #[test]
    fn mount_sort_respects_prefixes(
        mut points in prop::collection::vec(mount_point_strategy(), 1..6)
    ) {
        points.sort();
        points.dedup();
        let mut sorted = points.clone();
        sort_mount_points(&mut sorted);

        if points.contains(&"/".to_string()) {
            prop_assert_eq!(sorted[0].as_str(), "/");
        }

        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let later = &sorted[j];
                let earlier = &sorted[i];
                // A proper prefix may never come later.
                let later_is_prefix_of_earlier = earlier != later
                    && (later == "/" || earlier.starts_with(&format!("{}/", later)));
                prop_assert!(!later_is_prefix_of_earlier,
                    "{} sorted after {}", later, earlier);
            }
        }
    }

    /// Cloning is deep: mutating the copy never shows up in the
    /// original, and the copy still matches by identity.
    #[test]
    fn clone_isolates_speculative_edits(units in 1u64..100) {
        let mut original = disk(1u64 << 40);
        original
            .add_child(BlockDevice::new_partition(
                units * MIN_PARTITION_SIZE,
                FsKind::Ext4,
                Some("/"),
            ))
            .unwrap();

        let mut copy = original.clone();
        prop_assert!(copy.equals(&original));

        copy.children[0].size += MIN_PARTITION_SIZE;
        copy.children[0].mount_point = Some("/home".to_string());
        prop_assert_eq!(original.children[0].size, units * MIN_PARTITION_SIZE);
        prop_assert_eq!(original.children[0].mount_point.as_deref(), Some("/"));
    }
}

#[test]
fn consolidation_merges_what_carving_split() {
    // Carve two partitions, remove the table rows between, and the
    // remaining gaps merge back into one.
    let gap = 100 * MIN_PARTITION_SIZE;
    let mut table = PartTable::default();
    table.parts.push(free_row(0, gap - 1));
    let mut d = disk(gap);

    table
        .add_from_free_partition(
            &mut d,
            0,
            BlockDevice::new_partition(10 * MIN_PARTITION_SIZE, FsKind::Ext4, Some("/")),
        )
        .unwrap();

    // Drop the partition row, leaving its span free again.
    let row = table.parts.remove(0);
    table.parts.push(free_row(row.start, row.end));
    table.consolidate_free();

    assert_eq!(table.parts.len(), 1);
    assert_eq!(table.free_space(), gap);
}
