//! User account application
//!
//! Creates the described accounts inside the target root. Partial user
//! state is not acceptable, so any failure here is fatal.

use crate::cmdio;
use crate::error::{InstallerError, Result};
use crate::model::User;
use log::info;
use std::path::Path;

fn apply_user(root: &Path, user: &User) -> Result<()> {
    info!("creating user {}", user.login);

    let mut useradd = vec!["useradd", "-m", "-U"];
    if let Some(name) = user.username.as_deref().filter(|n| !n.is_empty()) {
        useradd.extend_from_slice(&["-c", name]);
    }
    useradd.push(&user.login);
    cmdio::run_chrooted("useradd", root, &useradd)?;

    let root_str = root.display().to_string();
    cmdio::run_with_input(
        "chpasswd",
        &["chroot", &root_str, "chpasswd", "-e"],
        &format!("{}:{}\n", user.login, user.password),
    )?;

    if user.admin {
        cmdio::run_chrooted("usermod", root, &["usermod", "-aG", "wheel", &user.login])?;
    }

    Ok(())
}

/// Create every described account in the target root.
pub fn apply_users(root: &Path, users: &[User]) -> Result<()> {
    for user in users {
        apply_user(root, user).map_err(|e| {
            InstallerError::general(format!("failed to create user {}: {}", user.login, e))
        })?;
    }
    Ok(())
}
