//! Telemetry endpoint plumbing
//!
//! Records install progress events through the host's telemetry client
//! and configures telemetry on the installed system. The transport is
//! external (`telem-record-gen` and the telemetry daemon); this module
//! only generates records and config files.

use crate::cmdio;
use crate::error::Result;
use crate::model::TelemetrySettings;
use log::{info, warn};
use std::fs;
use std::path::Path;

/// Record severities understood by the telemetry client.
pub const SEV_INFO: u32 = 1;
pub const SEV_ERROR: u32 = 2;

const CONF_PATH: &str = "/etc/telemetrics/telemetrics.conf";
const SPOOL_DIR: &str = "/var/spool/telemetry";

/// Telemetry state for one install run.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub enabled: bool,
    url: Option<String>,
    tid: Option<String>,
}

impl From<&TelemetrySettings> for Telemetry {
    fn from(settings: &TelemetrySettings) -> Self {
        Self {
            enabled: settings.enabled,
            url: settings.url.clone(),
            tid: settings.tid.clone(),
        }
    }
}

impl Telemetry {
    /// Record class for an installer event.
    fn class_for(event: &str) -> String {
        format!("org.keel/installer/{}", event)
    }

    /// Config file contents for the configured endpoint, when one is
    /// set. The default public endpoint needs no config.
    fn conf_contents(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let tid = self.tid.as_deref().unwrap_or("");
        Some(format!(
            "[settings]\nserver={}\nsocket_path=/run/telemd.socket\nspool_dir={}\nrecord_expiry=1200\nrecord_server_delivery_enabled=true\ntidheader=X-Telemetry-TID: {}\n",
            url, SPOOL_DIR, tid
        ))
    }

    /// Create or update the host endpoint config and restart the
    /// daemon so install events flow to the right server.
    pub fn bootstrap(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if let Some(contents) = self.conf_contents() {
            info!("pointing telemetry at {}", self.url.as_deref().unwrap_or(""));
            if let Some(parent) = Path::new(CONF_PATH).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(CONF_PATH, contents)?;
            cmdio::run_and_log("telemetry restart", &["systemctl", "restart", "telemd"])?;
        }

        Ok(())
    }

    /// Generate one install event record.
    ///
    /// A failed record is logged and swallowed when telemetry is
    /// otherwise working; records must never fail an install.
    pub fn log_record(&self, event: &str, severity: u32, payload: &str) {
        if !self.enabled {
            return;
        }

        let class = Self::class_for(event);
        let severity = severity.to_string();
        let result = cmdio::run_and_log(
            "telem-record-gen",
            &[
                "telem-record-gen",
                "--severity",
                &severity,
                "--class",
                &class,
                "--payload",
                payload,
            ],
        );
        if let Err(e) = result {
            warn!("failed to generate telemetry record {}: {}", class, e);
        }
    }

    /// Write the telemetry config onto the installed system.
    pub fn write_target_conf(&self, root: &Path) -> Result<()> {
        let Some(contents) = self.conf_contents() else {
            return Ok(());
        };

        let conf = root.join(CONF_PATH.trim_start_matches('/'));
        if let Some(parent) = conf.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(conf, contents)?;
        Ok(())
    }

    /// Stop the host daemon and hand any undelivered records to the
    /// installed system for later delivery.
    pub fn stop_and_copy_records(&self, root: &Path) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        cmdio::run_and_log("telemetry stop", &["systemctl", "stop", "telemd"])?;

        let target_spool = root.join(SPOOL_DIR.trim_start_matches('/'));
        if Path::new(SPOOL_DIR).exists() {
            fs::create_dir_all(&target_spool)?;
            let target = target_spool.display().to_string();
            cmdio::run_and_log("telemetry record copy", &["cp", "-a", SPOOL_DIR, &target])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_class() {
        assert_eq!(Telemetry::class_for("success"), "org.keel/installer/success");
        assert_eq!(Telemetry::class_for("swupd"), "org.keel/installer/swupd");
    }

    #[test]
    fn test_conf_only_for_custom_endpoint() {
        let default_endpoint = Telemetry {
            enabled: true,
            ..Telemetry::default()
        };
        assert!(default_endpoint.conf_contents().is_none());

        let custom = Telemetry {
            enabled: true,
            url: Some("https://telemetry.example/collector".to_string()),
            tid: Some("tid-123".to_string()),
        };
        let conf = custom.conf_contents().unwrap();
        assert!(conf.contains("server=https://telemetry.example/collector"));
        assert!(conf.contains("X-Telemetry-TID: tid-123"));
    }

    #[test]
    fn test_disabled_telemetry_is_inert() {
        let t = Telemetry::default();
        assert!(t.bootstrap().is_ok());
        t.log_record("success", SEV_INFO, "ok");
        assert!(t.stop_and_copy_records(Path::new("/nonexistent")).is_ok());
    }

    #[test]
    fn test_write_target_conf() {
        let dir = tempfile::tempdir().unwrap();
        let t = Telemetry {
            enabled: true,
            url: Some("https://t.example".to_string()),
            tid: None,
        };
        t.write_target_conf(dir.path()).unwrap();

        let written =
            fs::read_to_string(dir.path().join("etc/telemetrics/telemetrics.conf")).unwrap();
        assert!(written.contains("server=https://t.example"));
    }
}
