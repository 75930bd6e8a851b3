//! Unified error types for the portledger workspace.

use std::path::PathBuf;

use thiserror::Error;

use crate::port::Port;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum PortLedgerError {
    /// A single port value failed validation.
    #[error("invalid port '{value}': {reason}")]
    InvalidPort {
        /// Offending input.
        value: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A port pair list could not be parsed.
    #[error("invalid port pairs '{input}': {reason}")]
    InvalidPortPairs {
        /// Offending input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A reservation request was malformed.
    #[error("invalid reservation: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// The allocator could not find a free port.
    #[error("no free ports in range {min}-{max}")]
    Exhausted {
        /// First port of the range.
        min: Port,
        /// Last port of the range (inclusive).
        max: Port,
    },

    /// One internal port appeared twice in a unit's existing mappings.
    #[error(
        "port mapping conflict for internal port {internal}: bound to both {first} and {second}"
    )]
    Conflict {
        /// Internal port claimed twice.
        internal: Port,
        /// External port of the first existing mapping.
        first: Port,
        /// External port of the second existing mapping.
        second: Port,
    },

    /// An external port already has a ledger edge.
    #[error("port {port} is already reserved by {owner}")]
    AlreadyBound {
        /// The contested external port.
        port: Port,
        /// Current owner recorded in the ledger.
        owner: String,
    },

    /// A ledger filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The allocator worker has been shut down.
    #[error("port allocator has been stopped")]
    AllocatorStopped,

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl PortLedgerError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Io { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PortLedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_names_the_range() {
        let err = PortLedgerError::Exhausted {
            min: Port::new(40000),
            max: Port::new(40009),
        };
        assert_eq!(err.to_string(), "no free ports in range 40000-40009");
        assert!(err.is_retryable());
    }

    #[test]
    fn conflict_message_is_actionable() {
        let err = PortLedgerError::Conflict {
            internal: Port::new(8080),
            first: Port::new(40000),
            second: Port::new(40001),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("port mapping conflict for internal port 8080"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_errors_are_retryable() {
        let err = PortLedgerError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("/tmp/x"));
    }
}
