//! Process lock
//!
//! One installer at a time per machine: two processes partitioning
//! concurrently is how disks get destroyed. The lock is an advisory
//! PID file, taken before any destructive work and released on every
//! exit path through `Drop`.

use crate::error::{InstallerError, Result};
use log::{info, warn};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default lock path on the live image.
pub const DEFAULT_LOCK_PATH: &str = "/run/keel.lock";

/// Held process lock; releasing it removes the PID file.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

fn pid_is_alive(pid: i32) -> bool {
    // Signal 0 probes existence without delivering anything.
    kill(Pid::from_raw(pid), None).is_ok()
}

impl LockFile {
    /// Take the lock at `path`.
    ///
    /// A lock file naming a dead process is stale and gets replaced; a
    /// live holder makes this fail.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(path) {
            match contents.trim().parse::<i32>() {
                Ok(pid) if pid_is_alive(pid) => {
                    return Err(InstallerError::lock(format!(
                        "another installer (pid {}) holds {}",
                        pid,
                        path.display()
                    )));
                }
                _ => {
                    warn!("removing stale lock {}", path.display());
                    fs::remove_file(path)?;
                }
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                InstallerError::lock(format!("cannot create {}: {}", path.display(), e))
            })?;
        write!(file, "{}", std::process::id())?;

        info!("acquired lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.lock");

        {
            let _lock = LockFile::acquire(&path).unwrap();
            assert!(path.exists());
            let pid: u32 = fs::read_to_string(&path).unwrap().parse().unwrap();
            assert_eq!(pid, std::process::id());
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_live_holder_blocks_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.lock");

        let _lock = LockFile::acquire(&path).unwrap();
        let second = LockFile::acquire(&path);
        assert!(matches!(second, Err(InstallerError::Lock(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.lock");

        // A pid far beyond pid_max cannot name a live process.
        fs::write(&path, "99999999").unwrap();
        let _lock = LockFile::acquire(&path).unwrap();

        let pid: u32 = fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn test_garbage_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.lock");

        fs::write(&path, "not a pid").unwrap();
        assert!(LockFile::acquire(&path).is_ok());
    }
}
