use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use lapse_blob::BlobError;
use thiserror::Error;

/// Failure categories for S3 calls.
#[derive(Debug, Error)]
pub enum S3Error {
    /// The service rejected or failed the request.
    #[error("S3 service error: {0}")]
    Service(String),

    /// The request was throttled.
    #[error("S3 request throttled")]
    Throttled,

    /// A network or connection error occurred.
    #[error("S3 connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("S3 request timed out")]
    Timeout,

    /// The service answered without a field the protocol requires.
    #[error("malformed S3 response: {0}")]
    MalformedResponse(String),
}

impl From<S3Error> for BlobError {
    fn from(err: S3Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Classify an SDK error message into an [`S3Error`].
pub fn classify_sdk_error(error_str: &str) -> S3Error {
    let lower = error_str.to_lowercase();
    if lower.contains("throttl") || lower.contains("slowdown") || lower.contains("too many") {
        S3Error::Throttled
    } else if lower.contains("timeout") || lower.contains("timed out") {
        S3Error::Timeout
    } else if lower.contains("connect") || lower.contains("dns") || lower.contains("network") {
        S3Error::Connection(error_str.to_owned())
    } else {
        S3Error::Service(error_str.to_owned())
    }
}

/// Render an SDK error with its full source chain and classify it.
pub(crate) fn sdk_failure<E, R>(operation: &str, err: &SdkError<E, R>) -> BlobError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(err));
    tracing::error!(operation, error = %message, "S3 call failed");
    classify_sdk_error(&message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_throttled() {
        assert!(matches!(
            classify_sdk_error("SlowDown: Please reduce your request rate"),
            S3Error::Throttled
        ));
    }

    #[test]
    fn classify_timeout() {
        assert!(matches!(
            classify_sdk_error("request timed out after 30s"),
            S3Error::Timeout
        ));
    }

    #[test]
    fn classify_connection() {
        assert!(matches!(
            classify_sdk_error("dispatch failure: Connection refused"),
            S3Error::Connection(_)
        ));
    }

    #[test]
    fn classify_generic_service_error() {
        assert!(matches!(
            classify_sdk_error("AccessDenied: Access Denied"),
            S3Error::Service(_)
        ));
    }

    #[test]
    fn converts_into_storage_error() {
        let err: BlobError = S3Error::Throttled.into();
        assert!(matches!(err, BlobError::Storage(ref m) if m == "S3 request throttled"));
    }
}
