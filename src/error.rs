// src/error.rs

//! Crate-wide error type
//!
//! Per-request install failures are carried as [`Error`] values inside
//! `InstallError`; only orchestration setup problems surface as a hard
//! `Err` from batch operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields. Caller-fixable, never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A channel, registry, ruleset or version absent from configuration
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O failure with the operation and path that failed
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Lock file error: {0}")]
    LockFile(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    /// An install task panicked or its worker could not be joined
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Build an [`Error::IoError`] naming the operation that failed
    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Error::IoError(format!("{context}: {err}"))
    }

    /// Whether the caller can fix this by changing the request or configuration
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_) | Error::NotFound(_) | Error::ConfigError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_context() {
        let err = Error::io(
            "creating /tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("creating /tmp/x"));
        assert!(msg.contains("denied"));
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_caller_errors() {
        assert!(Error::InvalidRequest("x".into()).is_caller_error());
        assert!(Error::NotFound("x".into()).is_caller_error());
        assert!(!Error::Cancelled.is_caller_error());
    }
}
