//! External tool execution
//!
//! This module is the ONLY sanctioned way to invoke external tools
//! (parted, mkfs.*, mount, swupd, chroot'd commands). Routing every
//! invocation through here ensures:
//!
//! - The exact command line is logged before it runs
//! - Non-zero exits become `InstallerError::External` with the operation
//!   name attached, so failures stay attributable in logs and telemetry
//! - Environment injection and chroot prefixing are handled in one place

use crate::error::{InstallerError, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};

/// Captured output from an external tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the tool exited successfully (exit code 0).
    pub success: bool,
}

impl ToolOutput {
    /// Check that the tool succeeded, turning a failure into a typed error.
    pub fn ensure_success(&self, op: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(InstallerError::external(
                op,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim(),
            ))
        }
    }
}

/// Run an external tool, capturing stdout and stderr.
///
/// The first element of `args` is the binary; the rest are its arguments.
/// Does not fail on a non-zero exit; inspect the returned [`ToolOutput`]
/// or call [`ToolOutput::ensure_success`].
pub fn run(args: &[&str]) -> Result<ToolOutput> {
    run_with_env(args, &HashMap::new())
}

/// Run an external tool with extra environment variables.
pub fn run_with_env(args: &[&str], env: &HashMap<String, String>) -> Result<ToolOutput> {
    let (bin, rest) = args
        .split_first()
        .ok_or_else(|| InstallerError::general("empty command line"))?;

    debug!("run: {} {:?} env={:?}", bin, rest, env.keys());

    let mut cmd = Command::new(bin);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd
        .output()
        .map_err(|e| InstallerError::general(format!("failed to spawn {}: {}", bin, e)))?;

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    })
}

/// Run an external tool, feeding `input` on its stdin.
pub fn run_with_input(op: &str, args: &[&str], input: &str) -> Result<()> {
    use std::io::Write;

    let (bin, rest) = args
        .split_first()
        .ok_or_else(|| InstallerError::general("empty command line"))?;

    info!("{}: {} {:?}", op, bin, rest);

    let mut child = Command::new(bin)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| InstallerError::general(format!("failed to spawn {}: {}", bin, e)))?;

    if let Some(stdin) = child.stdin.take() {
        let mut stdin = stdin;
        stdin.write_all(input.as_bytes())?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| InstallerError::general(format!("failed to wait on {}: {}", bin, e)))?;

    ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    }
    .ensure_success(op)
}

/// Run an external tool and treat any non-zero exit as a fatal error.
///
/// `op` names the operation for error attribution; the full output is
/// logged either way.
pub fn run_and_log(op: &str, args: &[&str]) -> Result<()> {
    info!("{}: {}", op, args.join(" "));

    let output = run(args)?;
    if !output.stdout.trim().is_empty() {
        debug!("{} stdout: {}", op, output.stdout.trim());
    }
    if !output.stderr.trim().is_empty() {
        debug!("{} stderr: {}", op, output.stderr.trim());
    }

    output.ensure_success(op)
}

/// Run a command inside the target root via a chroot prefix.
pub fn run_chrooted(op: &str, root: &Path, args: &[&str]) -> Result<()> {
    let root_str = root.to_string_lossy();
    let mut full: Vec<&str> = vec!["chroot", &root_str];
    full.extend_from_slice(args);
    run_and_log(op, &full)
}
