//! Mapping of libssh2 failures onto the storage error taxonomy

use std::fmt::Display;

use ssh2::ErrorCode;
use stow_core::Error;

// SSH_FX_* status codes from the SFTP protocol
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_CONNECTION: i32 = 6;
const FX_CONNECTION_LOST: i32 = 7;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_WRITE_PROTECT: i32 = 12;
const FX_NO_SPACE_ON_FILESYSTEM: i32 = 14;
const FX_QUOTA_EXCEEDED: i32 = 15;

// LIBSSH2_ERROR_* session codes
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
const ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Classify an ssh2 error raised while working on `context`.
pub(crate) fn classify(err: ssh2::Error, context: impl Display) -> Error {
    let message = format!("{context}: {}", err.message());
    match err.code() {
        ErrorCode::SFTP(code) => match code {
            FX_NO_SUCH_FILE | FX_NO_SUCH_PATH => Error::NotFound(message),
            FX_PERMISSION_DENIED | FX_WRITE_PROTECT => Error::Access(message),
            FX_NO_SPACE_ON_FILESYSTEM | FX_QUOTA_EXCEEDED => Error::Quota(message),
            FX_NO_CONNECTION | FX_CONNECTION_LOST => Error::Connectivity(message),
            _ => Error::Io(std::io::Error::other(message)),
        },
        ErrorCode::Session(ERROR_AUTHENTICATION_FAILED | ERROR_PUBLICKEY_UNVERIFIED) => {
            Error::Access(message)
        }
        ErrorCode::Session(_) => Error::Connectivity(message),
    }
}

pub(crate) fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH)
    )
}
