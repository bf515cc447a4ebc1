//! Error types for the image request queue

use nix::errno::Errno;
use thiserror::Error;

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, AioError>;

/// Result type returned by the storage collaborators: a negative errno on failure
pub type BackendResult<T> = std::result::Result<T, i32>;

/// Error types that can occur while routing image I/O
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AioError {
    #[error("I/O received on a queue that is shutting down")]
    ShuttingDown,

    #[error("Exclusive lock acquisition failed: errno {0}")]
    LockAcquisitionFailed(i32),

    #[error("Exclusive lock required but automatic lock requests are disabled")]
    LockRequired,

    #[error("Image refresh failed: errno {0}")]
    RefreshFailed(i32),

    #[error("Backend error: errno {0}")]
    Backend(i32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for AioError {
    fn from(err: std::io::Error) -> Self {
        AioError::IoError(err.to_string())
    }
}

/// Negative errno for a well-known error number
pub(crate) fn neg_errno(errno: Errno) -> i32 {
    -(errno as i32)
}

impl AioError {
    /// Convert the error to the signed code handed to synchronous callers
    ///
    /// Codes received from collaborators (lock, refresh, backend) are passed
    /// through unmodified. Errors raised by the queue itself map onto the
    /// errno the block-device client expects:
    /// - `ShuttingDown` -> `-ESHUTDOWN`
    /// - `LockRequired` -> `-EROFS`
    /// - `InvalidArgument` / `ConfigError` -> `-EINVAL`
    /// - everything else -> `-EIO`
    pub fn to_errno(&self) -> i32 {
        match self {
            AioError::ShuttingDown => neg_errno(Errno::ESHUTDOWN),
            AioError::LockAcquisitionFailed(code) => *code,
            AioError::LockRequired => neg_errno(Errno::EROFS),
            AioError::RefreshFailed(code) => *code,
            AioError::Backend(code) => *code,
            AioError::InvalidArgument(_) => neg_errno(Errno::EINVAL),
            AioError::ConfigError(_) => neg_errno(Errno::EINVAL),
            AioError::IoError(_) => neg_errno(Errno::EIO),
            AioError::InternalError(_) => neg_errno(Errno::EIO),
        }
    }

    /// Determine if this error was raised by a gate before dispatch
    ///
    /// Gate failures never reached the backend. Backend errors were produced
    /// after dispatch and are never retried by the queue.
    pub fn is_gate_failure(&self) -> bool {
        match self {
            AioError::ShuttingDown => true,
            AioError::LockAcquisitionFailed(_) => true,
            AioError::LockRequired => true,
            AioError::RefreshFailed(_) => true,

            AioError::Backend(_) => false,
            AioError::InvalidArgument(_) => false,
            AioError::ConfigError(_) => false,
            AioError::IoError(_) => false,
            AioError::InternalError(_) => false,
        }
    }

    /// Wrap a backend failure code
    pub fn backend(code: i32) -> Self {
        AioError::Backend(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_errors_map_to_errno() {
        assert_eq!(AioError::ShuttingDown.to_errno(), -108);
        assert_eq!(AioError::LockRequired.to_errno(), -30);
        assert_eq!(
            AioError::InvalidArgument("offset".to_string()).to_errno(),
            -22
        );
        assert_eq!(AioError::InternalError("x".to_string()).to_errno(), -5);
    }

    #[test]
    fn test_collaborator_codes_pass_through() {
        assert_eq!(AioError::Backend(-28).to_errno(), -28);
        assert_eq!(AioError::LockAcquisitionFailed(-110).to_errno(), -110);
        assert_eq!(AioError::RefreshFailed(-2).to_errno(), -2);
    }

    #[test]
    fn test_gate_failures() {
        assert!(AioError::ShuttingDown.is_gate_failure());
        assert!(AioError::LockAcquisitionFailed(-1).is_gate_failure());
        assert!(AioError::RefreshFailed(-1).is_gate_failure());
        assert!(!AioError::backend(-5).is_gate_failure());
    }

    #[test]
    fn test_from_io_error() {
        let err: AioError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, AioError::IoError(msg) if msg.contains("boom")));
    }
}
