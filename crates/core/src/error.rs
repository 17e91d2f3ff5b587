//! Error types for stowage
//!
//! Every backend maps its platform failures onto this taxonomy, so calling code
//! never has to match on SDK-specific error types.

use std::fmt::Display;
use std::io::ErrorKind;

use thiserror::Error;

/// Result type alias for stowage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every backend
#[derive(Error, Debug)]
pub enum Error {
    /// Path or container does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authorization or permission failure
    #[error("Access denied: {0}")]
    Access(String),

    /// Path is malformed or resolves outside the backend root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Operation is not meaningful for this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Capacity exhausted while writing
    #[error("Quota exceeded: {0}")]
    Quota(String),

    /// Transport or disk failure that fits no narrower class
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Session or network failure
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Invalid backend parameters or profile file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Classify an I/O error, prefixing the message with what was being accessed.
    pub fn io_at(context: impl Display, err: std::io::Error) -> Self {
        let message = format!("{context}: {err}");
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => Error::Access(message),
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded | ErrorKind::FileTooLarge => {
                Error::Quota(message)
            }
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown => Error::Connectivity(message),
            kind => Error::Io(std::io::Error::new(kind, message)),
        }
    }

    /// Short stable name of the error class, used in JSON output
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Access(_) => "access",
            Error::InvalidPath(_) => "invalid_path",
            Error::Unsupported(_) => "unsupported",
            Error::Quota(_) => "quota",
            Error::Io(_) => "io",
            Error::Connectivity(_) => "connectivity",
            Error::Config(_) => "config",
            Error::General(_) => "general",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::Other | ErrorKind::Interrupted | ErrorKind::UnexpectedEof => Error::Io(err),
            _ => Error::io_at("io", err),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::General(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let err = Error::io_at("a.txt", std::io::Error::from(ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(err.to_string().contains("a.txt"));

        let err = Error::io_at("a.txt", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::Access(_)));

        let err = Error::io_at("a.txt", std::io::Error::from(ErrorKind::StorageFull));
        assert!(matches!(err, Error::Quota(_)));

        let err = Error::io_at("host", std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(matches!(err, Error::Connectivity(_)));

        let err = Error::io_at("a.txt", std::io::Error::from(ErrorKind::InvalidData));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_io_keeps_other_errors_raw() {
        let err: Error = std::io::Error::other("boom").into();
        assert_eq!(err.kind_name(), "io");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Error::NotFound("x".into()).kind_name(), "not_found");
        assert_eq!(Error::Unsupported("x".into()).kind_name(), "unsupported");
        assert_eq!(Error::InvalidPath("x".into()).kind_name(), "invalid_path");
    }
}
