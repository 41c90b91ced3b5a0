use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FastcgiError>;

/// Everything that can go wrong while serving a FastCGI connection.
///
/// Decode and framing errors are fatal to the connection they occur on.
/// `HandlerFailure` and `Timeout` coming out of a handler are reported to the
/// web server in the END_REQUEST record and the connection stays usable.
#[derive(Debug, Error)]
pub enum FastcgiError {
    #[error("malformed record header: need 8 bytes, got {0}")]
    MalformedHeader(usize),

    #[error("short read: record needs {expected} bytes, stream ended after {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("truncated name-value pair at offset {offset}")]
    TruncatedNameValue { offset: usize },

    #[error("length {len} does not fit in the {field} field")]
    LengthOverflow { field: &'static str, len: usize },

    #[error("unknown record type {0}")]
    UnknownRecordType(u8),

    #[error("record type {0} is not valid from a FastCGI client")]
    UnexpectedRecordType(u8),

    #[error("unsupported FastCGI version {0}")]
    UnsupportedVersion(u8),

    #[error("BEGIN_REQUEST body too short: {0} bytes")]
    MalformedBeginRequest(usize),

    #[error("{stream} stream exceeds the limit of {limit} bytes")]
    TooLarge { stream: &'static str, limit: usize },

    #[error("handler failed with status {app_status}: {reason}")]
    HandlerFailure { app_status: u32, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FastcgiError {
    pub fn handler_failure<R: Into<String>>(app_status: u32, reason: R) -> FastcgiError {
        FastcgiError::HandlerFailure {
            app_status,
            reason: reason.into(),
        }
    }

    /// The appStatus reported in END_REQUEST when a request fails with this error.
    /// Never zero, since zero means success.
    pub fn app_status(&self) -> u32 {
        match *self {
            FastcgiError::HandlerFailure { app_status, .. } if app_status != 0 => app_status,
            _ => 1,
        }
    }

    /// Whether this error is scoped to a single request rather than the connection.
    pub fn is_request_scoped(&self) -> bool {
        matches!(self, FastcgiError::HandlerFailure { .. } | FastcgiError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_status_is_never_zero() {
        assert_eq!(FastcgiError::handler_failure(255, "exit").app_status(), 255);
        assert_eq!(FastcgiError::handler_failure(0, "odd").app_status(), 1);
        assert_eq!(FastcgiError::Timeout(Duration::from_secs(1)).app_status(), 1);
    }

    #[test]
    fn request_scoped_kinds() {
        assert!(FastcgiError::handler_failure(2, "x").is_request_scoped());
        assert!(FastcgiError::Timeout(Duration::from_millis(5)).is_request_scoped());
        assert!(!FastcgiError::MalformedHeader(3).is_request_scoped());
        assert!(!FastcgiError::TruncatedNameValue { offset: 0 }.is_request_scoped());
    }
}
