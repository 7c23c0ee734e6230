//! CSI error types.
//!
//! All errors in the crate are represented by the [`CsiError`] enum, which
//! derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! socket transport layer.
//!
//! The variants mirror the gRPC status codes a CSI plugin is expected to
//! return; the transport reports them to the orchestrator verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied a missing or malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced volume (cloud server) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A volume with the derived hostname already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A requested capacity violates the supported bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The operation is deliberately not implemented.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A socket / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error: IaaS API failure after retries,
    /// SSH/SFTP errors, script failures, transaction timeouts.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CsiError::NotFound("server vol-123".into());
        assert_eq!(err.to_string(), "not found: server vol-123");
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = CsiError::MountFailed {
            path: "/mnt/test".into(),
            reason: "permission denied".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CsiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }

    #[test]
    fn helper_constructors() {
        let err = CsiError::internal(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(err.to_string().contains("boom"));
    }
}
