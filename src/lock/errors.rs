//! Lock Error Types

use thiserror::Error;

use crate::context::ContextError;

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Errors raised by the lock service and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Release or renew was attempted without holding the lease.
    #[error("lock not held")]
    DontHaveLock,

    /// The backend did not confirm the operation in time.
    #[error("lock backend did not respond in time")]
    LockTimeout,

    /// Acquisition gave up because its context ended.
    #[error("lock acquisition aborted: {0}")]
    AcquireAborted(ContextError),

    /// The lease expired or was taken over while we believed we held it.
    #[error("lease lost")]
    LeaseLost,

    /// The backend is unreachable or returned an error.
    #[error("lock backend error: {0}")]
    Backend(String),

    /// Invalid lock configuration.
    #[error("invalid lock configuration: {0}")]
    Misconfigured(String),
}

impl LockError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Transient errors can be retried by a fresh attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout | Self::AcquireAborted(_) | Self::Backend(_) | Self::LeaseLost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LockError::LockTimeout.is_transient());
        assert!(LockError::AcquireAborted(ContextError::DeadlineExceeded).is_transient());
        assert!(!LockError::DontHaveLock.is_transient());
        assert!(!LockError::Misconfigured("x".into()).is_transient());
    }
}
