//! Install hooks
//!
//! Shell commands run before or after install, on the host or inside
//! the target root. Hook commands may reference a small fixed variable
//! set, expanded as `$name` or `${name}`:
//!
//! | variable    | value                                 |
//! |-------------|---------------------------------------|
//! | `chrootDir` | absolute path of the target root      |
//! | `chrooted`  | `1` when run inside the target root   |
//!
//! Hook failures are fatal; a hook is part of the install contract.

use crate::cmdio;
use crate::error::{InstallerError, Result};
use crate::model::InstallHook;
use log::info;
use std::collections::HashMap;
use std::path::Path;

/// Expand `$name` and `${name}` occurrences against `vars`.
///
/// Unknown variables are left untouched for the shell to deal with.
pub fn expand_variables(cmd: &str, vars: &HashMap<&str, String>) -> String {
    let mut expanded = cmd.to_string();
    for (name, value) in vars {
        expanded = expanded.replace(&format!("${{{}}}", name), value);
        expanded = expanded.replace(&format!("${}", name), value);
    }
    expanded
}

fn hook_vars(root: &Path, chrooted: bool) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("chrootDir", root.display().to_string());
    vars.insert("chrooted", if chrooted { "1" } else { "0" }.to_string());
    vars
}

/// Run a list of hooks in order, stopping at the first failure.
pub fn run_hooks(root: &Path, hooks: &[InstallHook]) -> Result<()> {
    for hook in hooks {
        let vars = hook_vars(root, hook.chroot);
        let cmd = expand_variables(&hook.cmd, &vars);
        info!("running hook: {}", cmd);

        let result = if hook.chroot {
            cmdio::run_chrooted("hook", root, &["sh", "-c", &cmd])
        } else {
            cmdio::run_and_log("hook", &["sh", "-c", &cmd])
        };

        result.map_err(|e| InstallerError::hook(format!("{}: {}", hook.cmd, e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_both_forms() {
        let vars = hook_vars(Path::new("/mnt/target"), false);
        assert_eq!(
            expand_variables("cp data ${chrootDir}/opt", &vars),
            "cp data /mnt/target/opt"
        );
        assert_eq!(
            expand_variables("cp data $chrootDir/opt", &vars),
            "cp data /mnt/target/opt"
        );
    }

    #[test]
    fn test_chrooted_flag_value() {
        let vars = hook_vars(Path::new("/mnt/target"), true);
        assert_eq!(expand_variables("test $chrooted = 1", &vars), "test 1 = 1");
    }

    #[test]
    fn test_unknown_variables_left_alone() {
        let vars = hook_vars(Path::new("/mnt/target"), false);
        assert_eq!(expand_variables("echo $HOME", &vars), "echo $HOME");
    }

    #[test]
    fn test_host_hook_runs() {
        let hooks = [InstallHook {
            cmd: "true".to_string(),
            chroot: false,
        }];
        assert!(run_hooks(Path::new("/tmp"), &hooks).is_ok());
    }

    #[test]
    fn test_failing_hook_is_fatal() {
        let hooks = [InstallHook {
            cmd: "false".to_string(),
            chroot: false,
        }];
        let err = run_hooks(Path::new("/tmp"), &hooks).expect_err("must fail");
        assert!(matches!(err, InstallerError::Hook(_)));
    }
}
