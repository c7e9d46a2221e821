//! Storage planning engine
//!
//! The model, discovery, layout and execution layers the installer's
//! disk handling is built from. See the module docs for the division of
//! labor; the short version is that everything plans in memory first
//! and only `part_table::write_partition_table` and `ops` touch
//! hardware.

pub mod block_device;
pub mod enumerate;
pub mod layout;
pub mod ops;
pub mod part_table;
pub mod targets;

pub use block_device::{BlockDevice, ConfigStatus, DeviceKind, FsKind};
pub use part_table::{PartTable, PartedPartition};
pub use targets::{InstallMode, InstallTarget, Selection};
