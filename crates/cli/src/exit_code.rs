//! Process exit codes
//!
//! Scripts rely on these values, so they never change once assigned.

use stow_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments, paths or configuration
    UsageError = 2,
    NetworkError = 3,
    AuthError = 4,
    NotFound = 5,
    UnsupportedFeature = 6,
    QuotaExceeded = 7,
}

impl ExitCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => ExitCode::Success,
            1 => ExitCode::GeneralError,
            2 => ExitCode::UsageError,
            3 => ExitCode::NetworkError,
            4 => ExitCode::AuthError,
            5 => ExitCode::NotFound,
            6 => ExitCode::UnsupportedFeature,
            7 => ExitCode::QuotaExceeded,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Exit code for a storage error
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Access(_) => ExitCode::AuthError,
            Error::InvalidPath(_) | Error::Config(_) => ExitCode::UsageError,
            Error::Unsupported(_) => ExitCode::UnsupportedFeature,
            Error::Quota(_) => ExitCode::QuotaExceeded,
            Error::Connectivity(_) => ExitCode::NetworkError,
            Error::Io(_) | Error::General(_) => ExitCode::GeneralError,
        }
    }

    /// Exit code for an error chain that may wrap a storage error
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<Error>())
            .map(Self::from_error)
            .unwrap_or(ExitCode::GeneralError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_round_trip_codes() {
        for code in 0..8 {
            assert_eq!(ExitCode::from_i32(code).unwrap().as_i32(), code);
        }
        assert_eq!(ExitCode::from_i32(42), None);
    }

    #[test]
    fn test_storage_errors() {
        assert_eq!(
            ExitCode::from_error(&Error::NotFound("x".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::Connectivity("x".into())),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from_error(&Error::InvalidPath("x".into())),
            ExitCode::UsageError
        );
    }

    #[test]
    fn test_wrapped_errors() {
        let wrapped: anyhow::Result<()> =
            Err(Error::Access("denied".into())).context("opening profile 'prod'");
        assert_eq!(
            ExitCode::from_anyhow(&wrapped.unwrap_err()),
            ExitCode::AuthError
        );
        assert_eq!(
            ExitCode::from_anyhow(&anyhow::anyhow!("plain")),
            ExitCode::GeneralError
        );
    }
}
