//! Error types for the orchestration core.
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = HarnessError> = core::result::Result<T, E>;

/// Every failure the harness can report.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Filesystem or process I/O failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid or unreadable configuration.
    #[error("config: {0}")]
    Config(String),
    /// No port or working directory could be handed out.
    #[error("resource allocation: {0}")]
    ResourceAllocation(String),
    /// A node did not become ready in time.
    #[error("startup timeout: {node} did not print {marker:?} within {after:?}")]
    StartupTimeout {
        /// Console label (the node's working directory).
        node: String,
        /// Output the harness was waiting for.
        marker: String,
        /// Configured limit.
        after: Duration,
    },
    /// A query on a ready node got no answer in time.
    #[error("timeout: {node} did not print {marker:?} within {after:?}")]
    Timeout {
        /// Console label (the node's working directory).
        node: String,
        /// Output the harness was waiting for.
        marker: String,
        /// Configured limit.
        after: Duration,
    },
    /// The console closed its output before printing what was expected.
    #[error("process exited: {node} closed its output while waiting for {marker:?}")]
    ProcessExited {
        /// Console label.
        node: String,
        /// Output the harness was waiting for.
        marker: String,
    },
    /// The node kind has no such capability.
    #[error("unsupported operation: {operation} is not available on {kind} nodes")]
    UnsupportedOperation {
        /// Node kind name.
        kind: &'static str,
        /// Operation name.
        operation: &'static str,
    },
    /// The console answered with something other than the expected token.
    #[error("protocol assertion: expected {expected:?}, got {actual:?}")]
    ProtocolAssertion {
        /// Token the dialect acknowledges with.
        expected: String,
        /// Normalized text that was read instead.
        actual: String,
    },
    /// A node index or menu choice that does not exist.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
}

impl HarnessError {
    /// Builds [`HarnessError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Builds [`HarnessError::ResourceAllocation`].
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::ResourceAllocation(msg.into())
    }

    /// Builds [`HarnessError::InvalidSelection`].
    pub fn selection(msg: impl Into<String>) -> Self {
        Self::InvalidSelection(msg.into())
    }

    /// Builds [`HarnessError::UnsupportedOperation`].
    pub fn unsupported(kind: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { kind, operation }
    }

    /// Builds [`HarnessError::ProtocolAssertion`].
    pub fn assertion(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ProtocolAssertion {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Re-labels a read timeout observed during bring-up as a startup failure.
    pub fn into_startup(self) -> Self {
        match self {
            Self::Timeout {
                node,
                marker,
                after,
            } => Self::StartupTimeout {
                node,
                marker,
                after,
            },
            other => other,
        }
    }

    /// True for both read and startup timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StartupTimeout { .. })
    }
}
