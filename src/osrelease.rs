//! Host OS release metadata
//!
//! The install version defaults to whatever the host image runs, read
//! from os-release. An unparsable file is fatal; installing an unknown
//! version is not an option.

use crate::error::{InstallerError, Result};
use std::fs;
use std::path::Path;

const OS_RELEASE_PATHS: [&str; 2] = ["/usr/lib/os-release", "/etc/os-release"];

/// Extract VERSION_ID from os-release contents.
pub fn version_from_str(contents: &str) -> Result<String> {
    for line in contents.lines() {
        if let Some(value) = line.trim().strip_prefix("VERSION_ID=") {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if value.is_empty() {
                break;
            }
            return Ok(value.to_string());
        }
    }
    Err(InstallerError::general("no VERSION_ID in os-release"))
}

/// The host's OS version.
pub fn host_version() -> Result<String> {
    for path in OS_RELEASE_PATHS {
        if Path::new(path).exists() {
            return version_from_str(&fs::read_to_string(path)?);
        }
    }
    Err(InstallerError::general("no os-release file found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_version_id() {
        let contents = "NAME=\"Keel Linux\"\nID=keel\nVERSION_ID=41420\n";
        assert_eq!(version_from_str(contents).unwrap(), "41420");
    }

    #[test]
    fn test_parses_quoted_version_id() {
        assert_eq!(version_from_str("VERSION_ID=\"38.2\"\n").unwrap(), "38.2");
    }

    #[test]
    fn test_missing_version_id_fails() {
        assert!(version_from_str("NAME=other\n").is_err());
        assert!(version_from_str("VERSION_ID=\n").is_err());
    }
}
