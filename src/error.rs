//! Error handling module for keel
//!
//! Provides centralized error handling with proper error types using thiserror.
//! All errors in the installer should use these types for consistency.
//!
//! Errors fall into three classes (see the controller for how they are used):
//! fatal-abort errors stop the installation and request diagnostics,
//! recoverable errors are logged and recorded via telemetry, and retryable
//! errors (network) get a bounded number of attempts before turning fatal.

use thiserror::Error;

/// Main error type for keel
#[derive(Error, Debug)]
pub enum InstallerError {
    /// IO errors (file operations, mounts, lock file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, missing required fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage model errors (partition accounting, layout, validation)
    #[error("Storage error: {0}")]
    Storage(String),

    /// An external tool exited with a failure status
    #[error("{op} failed (exit code {code}): {stderr}")]
    External {
        /// Name of the failing operation, e.g. "parted" or "mkfs.ext4"
        op: String,
        /// Exit code, -1 when terminated by signal
        code: i32,
        /// Trimmed stderr of the tool
        stderr: String,
    },

    /// Network configuration / connectivity errors
    #[error("Network error: {0}")]
    Network(String),

    /// Telemetry endpoint errors
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Install hook execution errors
    #[error("Hook failed: {0}")]
    Hook(String),

    /// Another installer instance holds the lock
    #[error("Lock error: {0}")]
    Lock(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

// Convenient error constructors
impl InstallerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an external-tool error
    pub fn external(op: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::External {
            op: op.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a telemetry error
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// True for errors caused by an invalid install description.
    ///
    /// Validation errors are the user's to fix; they are printed plainly
    /// instead of triggering a crash-report request.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
