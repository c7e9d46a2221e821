//! Network checks
//!
//! Content staging needs a working network. The probe is retried a
//! fixed number of times with a fixed delay; only after the retries
//! are exhausted does the failure become fatal.

use crate::cmdio;
use crate::error::{InstallerError, Result};
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// URL fetched to prove connectivity.
const PROBE_URL: &str = "https://cdn.download.clearlinux.org/latest";

/// Probe attempts before the failure becomes fatal.
const PROBE_ATTEMPTS: u32 = 3;

/// Fixed delay between probe attempts.
const PROBE_DELAY: Duration = Duration::from_secs(2);

/// Export the proxy to this process's environment so every child
/// process (swupd, curl) inherits it.
pub fn apply_proxy(https_proxy: Option<&str>) {
    if let Some(proxy) = https_proxy.filter(|p| !p.is_empty()) {
        info!("using https proxy {}", proxy);
        std::env::set_var("https_proxy", proxy);
        std::env::set_var("HTTPS_PROXY", proxy);
    }
}

fn probe_once() -> bool {
    cmdio::run(&[
        "curl",
        "--silent",
        "--fail",
        "--output",
        "/dev/null",
        "--max-time",
        "10",
        PROBE_URL,
    ])
    .map(|out| out.success)
    .unwrap_or(false)
}

fn probe_with_retries<F>(attempts: u32, delay: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for attempt in 1..=attempts {
        if probe() {
            return Ok(());
        }
        warn!("network probe failed (attempt {}/{})", attempt, attempts);
        if attempt < attempts {
            thread::sleep(delay);
        }
    }

    Err(InstallerError::network(format!(
        "no network connectivity after {} attempts",
        attempts
    )))
}

/// Verify the machine can reach the content server.
pub fn check_connectivity() -> Result<()> {
    probe_with_retries(PROBE_ATTEMPTS, PROBE_DELAY, probe_once)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_stops_on_first_success() {
        let mut calls = 0;
        let result = probe_with_retries(3, Duration::ZERO, || {
            calls += 1;
            calls == 2
        });
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let mut calls = 0;
        let result = probe_with_retries(3, Duration::ZERO, || {
            calls += 1;
            false
        });
        assert!(matches!(result, Err(InstallerError::Network(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_immediate_success_probes_once() {
        let mut calls = 0;
        probe_with_retries(3, Duration::ZERO, || {
            calls += 1;
            true
        })
        .unwrap();
        assert_eq!(calls, 1);
    }
}
