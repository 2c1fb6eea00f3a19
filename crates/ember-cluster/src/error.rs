//! Error types for cluster configuration management.

use ember_persistence::FormatError;

use crate::MemberId;

/// Errors that can occur while initializing, merging, or changing the
/// cluster configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The persisted configuration could not be read or written.
    #[error("persisted configuration: {0}")]
    Persistence(#[from] FormatError),

    /// A configuration body could not be encoded or decoded.
    #[error("configuration codec error: {0}")]
    Codec(String),

    /// No initialized configuration is known.
    #[error("cluster configuration is not initialized")]
    Uninitialized,

    /// A change was requested on a member other than the coordinator.
    #[error("member {local} is not the coordinator (coordinator is {coordinator})")]
    NotCoordinator {
        local: MemberId,
        coordinator: MemberId,
    },

    /// Another change plan is still in progress.
    #[error("change {change_id} is already in progress")]
    ConcurrentModification { change_id: u64 },

    /// The request is malformed or can't apply to the current configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The operation is valid but not allowed in the current state.
    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// The external effect of an operation failed.
    #[error("failed to apply operation: {0}")]
    ApplyFailed(String),

    /// Network error talking to a peer.
    #[error("cluster communication error: {0}")]
    Transport(String),

    /// Invalid static settings.
    #[error("invalid cluster configuration: {0}")]
    Configuration(String),

    /// The actor behind a handle has shut down.
    #[error("cluster configuration service unavailable")]
    Unavailable,
}

/// Coarse classification of a [`ClusterError`], used to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local state exists but can't be trusted.
    Broken,
    /// The request was refused; retrying it unchanged won't help.
    Rejected,
    /// A retry may succeed.
    Transient,
    /// Nothing sensible to do but stop.
    Fatal,
}

impl ClusterError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::Persistence(e) if e.is_corruption() => ErrorKind::Broken,
            ClusterError::Codec(_) => ErrorKind::Broken,
            ClusterError::NotCoordinator { .. }
            | ClusterError::ConcurrentModification { .. }
            | ClusterError::InvalidRequest(_)
            | ClusterError::OperationNotAllowed(_) => ErrorKind::Rejected,
            ClusterError::Persistence(_)
            | ClusterError::ApplyFailed(_)
            | ClusterError::Transport(_) => ErrorKind::Transient,
            ClusterError::Uninitialized
            | ClusterError::Configuration(_)
            | ClusterError::Unavailable => ErrorKind::Fatal,
        }
    }

    /// Returns true if the persisted configuration is corrupt.
    pub fn is_broken(&self) -> bool {
        self.kind() == ErrorKind::Broken
    }

    /// Creates an `InvalidRequest` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        ClusterError::InvalidRequest(msg.into())
    }

    /// Creates an `OperationNotAllowed` error.
    pub fn not_allowed(msg: impl Into<String>) -> Self {
        ClusterError::OperationNotAllowed(msg.into())
    }
}
