//! Mapping of SDK failures onto the storage error taxonomy

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stow_core::Error;

/// Classify an SDK error raised while working on `context`.
pub(crate) fn classify<E>(err: SdkError<E>, context: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            return Error::Connectivity(message);
        }
        SdkError::ConstructionFailure(_) => return Error::General(message),
        _ => {}
    }

    let status = err.raw_response().map(|r| r.status().as_u16());
    from_parts(err.code(), status, message)
}

fn from_parts(code: Option<&str>, status: Option<u16>, message: String) -> Error {
    match (code, status) {
        (Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload"), _) | (_, Some(404)) => {
            Error::NotFound(message)
        }
        (
            Some(
                "AccessDenied"
                | "AllAccessDisabled"
                | "InvalidAccessKeyId"
                | "SignatureDoesNotMatch"
                | "ExpiredToken"
                | "InvalidToken",
            ),
            _,
        )
        | (_, Some(401 | 403)) => Error::Access(message),
        (Some("QuotaExceeded" | "XMinioStorageFull" | "EntityTooLarge" | "TooManyBuckets"), _)
        | (_, Some(507)) => Error::Quota(message),
        (Some("SlowDown" | "ServiceUnavailable" | "InternalError" | "RequestTimeout"), _)
        | (_, Some(500..=599)) => Error::Connectivity(message),
        _ => Error::Io(std::io::Error::other(message)),
    }
}
