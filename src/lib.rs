//! keel: a declarative installer for swupd-based Linux systems
//!
//! Given the machine's block devices and a JSON install description,
//! keel partitions storage, creates filesystems, stages OS content and
//! applies post-install configuration.
//!
//! The crate divides into:
//! - [`storage`]: the planning engine (device model, partition table
//!   adapter, target discovery, layout generation, mount/mkfs ops)
//! - [`controller`]: the linear install sequencer and its
//!   fatal/non-fatal failure policy
//! - [`model`]: the install description and its validation
//! - [`content`], [`telemetry`], [`network`], [`users`], [`hostname`],
//!   [`hooks`]: the external collaborators the controller supervises
//! - [`cmdio`], [`error`], [`lockfile`], [`cli`]: process plumbing

pub mod cli;
pub mod cmdio;
pub mod content;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod hostname;
pub mod lockfile;
pub mod model;
pub mod network;
pub mod osrelease;
pub mod sizes;
pub mod storage;
pub mod telemetry;
pub mod users;

pub use error::{InstallerError, Result};
