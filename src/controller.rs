//! Installation controller
//!
//! The top-level sequencer. Runs the install as one linear pass, since
//! every step depends on the on-disk side effects of the previous one:
//! partition table, then filesystems, then mounts, then content, then
//! configuration. Failure handling follows a fixed policy: partition,
//! filesystem, mount, boot loader, hook and user failures abort the
//! install; individual bundle failures and archival failures are
//! recorded and skipped.

use crate::content::ContentClient;
use crate::error::{InstallerError, Result};
use crate::hooks;
use crate::hostname;
use crate::model::InstallDescription;
use crate::network;
use crate::osrelease;
use crate::storage::ops::{self, Mounter};
use crate::storage::part_table::{self, PartTable};
use crate::storage::{enumerate, layout, targets, BlockDevice, InstallMode};
use crate::telemetry::{Telemetry, SEV_ERROR, SEV_INFO};
use crate::users;
use log::{debug, error, info, warn};
use std::fs;
use std::path::PathBuf;

/// Per-invocation state threaded through the install.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Ephemeral root the target filesystems are mounted under.
    pub root: PathBuf,
    /// Whether `root` was created for this run and should be removed.
    pub ephemeral_root: bool,
    /// Connectivity already proven for this invocation.
    pub network_passing: bool,
    /// Install description file, for post-install archiving.
    pub config_path: Option<PathBuf>,
    /// Installer log file, for post-install archiving.
    pub log_path: Option<PathBuf>,
}

impl InstallContext {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ephemeral_root: true,
            network_passing: false,
            config_path: None,
            log_path: None,
        }
    }
}

/// Pick an install target automatically and fill the description with
/// a standard layout on it.
///
/// A disk whose partitions were pre-named for install wins outright.
/// Otherwise the best safe target is taken, falling back to erasing
/// the best disk only when the caller allowed data loss.
pub fn auto_plan(desc: &mut InstallDescription, allow_destructive: bool) -> Result<()> {
    let devices = enumerate::list_available()?;

    if let Some((media, target)) = targets::find_advanced_targets(&devices).into_iter().next() {
        info!("using pre-named partitions on {}", target.friendly);
        desc.add_target_media(media);
        return Ok(());
    }

    let safe = targets::find_safe_targets(&devices)?;

    let chosen = match targets::default_mode(&safe) {
        InstallMode::Safe => safe.into_iter().next(),
        InstallMode::Destructive => {
            if !allow_destructive {
                return Err(InstallerError::config(
                    "no safe install target found; pass --destructive to erase a disk",
                ));
            }
            targets::find_destructive_targets(&devices).into_iter().next()
        }
    }
    .ok_or_else(|| InstallerError::storage("no usable install target found"))?;

    info!(
        "auto-selected target: {}{}",
        chosen.friendly,
        if chosen.data_loss { " (will be erased)" } else { "" }
    );

    let mut device = devices
        .into_iter()
        .find(|d| d.name == chosen.name)
        .ok_or_else(|| InstallerError::storage("selected device vanished"))?;

    if chosen.erase_disk {
        device.children.clear();
    }
    layout::standard_partitions(&mut device, &chosen, layout::ram_total()?)?;
    device.user_defined = true;
    desc.add_target_media(device);

    Ok(())
}

fn require_root_privileges() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(InstallerError::general(
            "the installer must run with root privileges",
        ));
    }
    Ok(())
}

/// Version the install will target: the explicit one when configured,
/// the host's otherwise.
fn resolve_version(desc: &InstallDescription) -> Result<String> {
    match desc.version.as_deref().filter(|v| !v.is_empty()) {
        Some(version) => Ok(version.to_string()),
        None => osrelease::host_version(),
    }
}

/// Commit one target media's pending partitions to disk.
///
/// A media whose children are all pending gets a fresh table; a media
/// with surviving partitions keeps its table and the new partitions go
/// into the free gap that holds them.
fn commit_media(media: &mut BlockDevice) -> Result<()> {
    let pending: u64 = media
        .children
        .iter()
        .filter(|c| c.make_partition)
        .map(|c| c.size)
        .sum();
    if pending == 0 {
        debug!("{}: no pending partitions", media.name);
        return Ok(());
    }

    let wipe = media.children.iter().all(|c| c.make_partition);
    let start_at = if wipe {
        None
    } else {
        let table = PartTable::read(media)?;
        let gap = table.find_free(pending).ok_or_else(|| {
            InstallerError::storage(format!(
                "{}: no free region holds the {} pending bytes",
                media.name, pending
            ))
        })?;
        Some(gap.start)
    };

    part_table::write_partition_table(media, wipe, start_at)
}

fn partition_and_format(desc: &mut InstallDescription) -> Result<()> {
    for media in &mut desc.target_medias {
        info!("writing partition table on {}", media.name);
        commit_media(media)?;

        let total = media.children.iter().filter(|c| c.format_partition).count();
        let mut step = 0;
        for child in &mut media.children {
            if !child.format_partition {
                continue;
            }
            step += 1;
            info!("creating filesystem on {} ({}/{})", child.name, step, total);
            ops::make_fs(child)?;
            child.format_partition = false;
        }
    }
    Ok(())
}

/// Stage OS content: base bootstrap, update policy, then bundles.
///
/// Returns the bundles that failed to install; those failures are
/// non-fatal by policy. Everything else here is fatal, including the
/// update-disable step, since leaving auto-update ambiguous is unsafe.
pub fn content_install<C: ContentClient>(
    desc: &InstallDescription,
    client: &C,
    telemetry: &Telemetry,
    version: &str,
) -> Result<Vec<String>> {
    info!("bootstrapping OS content at version {}", version);
    client.verify(version)?;

    if desc.auto_update {
        client.update()?;
    } else {
        client.disable_update()?;
    }

    let bundles = desc
        .bundles
        .iter()
        .chain(desc.kernel_bundle.iter())
        .cloned();

    let mut failed = Vec::new();
    for bundle in bundles {
        if client.is_core_bundle(&bundle) {
            debug!("bundle {} is part of the base install, skipping", bundle);
            continue;
        }

        info!("installing bundle {}", bundle);
        if let Err(e) = client.bundle_add(&bundle) {
            error!("bundle {} failed to install: {}", bundle, e);
            telemetry.log_record(
                "swupd",
                SEV_ERROR,
                &format!("bundle-add {} failed: {}", bundle, e),
            );
            failed.push(bundle);
        }
    }

    Ok(failed)
}

/// Record and archive the install results. Archival problems are
/// accumulated and reported together; none of them fail the install.
pub fn save_install_results(
    desc: &InstallDescription,
    ctx: &InstallContext,
    telemetry: &Telemetry,
    failed_bundles: &[String],
) -> Result<()> {
    let clean = desc.sanitized();
    let payload = serde_json::to_string(&clean)?;
    telemetry.log_record("success", SEV_INFO, &payload);

    if desc.post_archive {
        let mut problems: Vec<String> = Vec::new();
        let archive_dir = ctx.root.join("root");

        if let Err(e) = fs::create_dir_all(&archive_dir) {
            problems.push(format!("cannot create {}: {}", archive_dir.display(), e));
        } else {
            if let Err(e) = clean.save(&archive_dir.join("keel-install.json")) {
                problems.push(format!("config archive failed: {}", e));
            }
            if let Some(log_path) = &ctx.log_path {
                if let Err(e) = fs::copy(log_path, archive_dir.join("keel-install.log")) {
                    problems.push(format!("log archive failed: {}", e));
                }
            }
            if !failed_bundles.is_empty() {
                let note = format!("bundles not installed: {}\n", failed_bundles.join(", "));
                if let Err(e) = fs::write(archive_dir.join("keel-install-errors.log"), note) {
                    problems.push(format!("error report failed: {}", e));
                }
            }
        }

        for problem in &problems {
            warn!("post-install archive: {}", problem);
        }
    }

    telemetry.stop_and_copy_records(&ctx.root)?;
    Ok(())
}

/// Unmount everything and drop the ephemeral root. Never fails;
/// cleanup problems are logged and left behind.
pub fn cleanup(mounter: &mut Mounter, ctx: &InstallContext) {
    for failure in mounter.umount_all() {
        warn!("cleanup: {}", failure);
    }

    if ctx.ephemeral_root {
        if let Err(e) = fs::remove_dir_all(&ctx.root) {
            warn!("cleanup: cannot remove {}: {}", ctx.root.display(), e);
        }
    }
}

fn run_install<C: ContentClient>(
    desc: &mut InstallDescription,
    ctx: &mut InstallContext,
    client: &C,
    telemetry: &Telemetry,
    mounter: &mut Mounter,
) -> Result<Vec<String>> {
    require_root_privileges()?;

    hooks::run_hooks(&ctx.root, &desc.pre_install)?;

    telemetry.bootstrap()?;

    let version = resolve_version(desc)?;
    info!("installing version {}", version);

    desc.validate()?;

    network::apply_proxy(desc.https_proxy.as_deref());
    if !ctx.network_passing {
        network::check_connectivity()?;
        ctx.network_passing = true;
    }

    partition_and_format(desc)?;

    fs::create_dir_all(&ctx.root)?;
    mounter.mount_all(&ctx.root, &desc.target_medias)?;
    mounter.mount_meta_fs(&ctx.root)?;

    let failed_bundles = content_install(desc, client, telemetry, &version)?;

    info!("updating boot loader");
    crate::cmdio::run_chrooted("clr-boot-manager", &ctx.root, &["clr-boot-manager", "update"])?;

    users::apply_users(&ctx.root, &desc.users)?;
    if let Some(name) = desc.hostname.as_deref().filter(|h| !h.is_empty()) {
        hostname::apply_hostname(&ctx.root, name)?;
    }
    telemetry.write_target_conf(&ctx.root)?;

    hooks::run_hooks(&ctx.root, &desc.post_install)?;

    Ok(failed_bundles)
}

/// Run a complete install.
///
/// On success the sanitized results are recorded and archived; on any
/// path, mounts are torn down and the ephemeral root removed before
/// returning.
pub fn install<C: ContentClient>(
    desc: &mut InstallDescription,
    ctx: &mut InstallContext,
    client: &C,
    telemetry: &Telemetry,
) -> Result<()> {
    let mut mounter = Mounter::new();
    let result = run_install(desc, ctx, client, telemetry, &mut mounter);

    let result = match result {
        Ok(failed_bundles) => {
            if let Err(e) = save_install_results(desc, ctx, telemetry, &failed_bundles) {
                warn!("failed to save install results: {}", e);
            }
            info!("installation complete");
            Ok(())
        }
        Err(e) => Err(e),
    };

    cleanup(&mut mounter, ctx);
    result
}
