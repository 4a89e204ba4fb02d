//! Error types for the zoolock client
//!
//! - `StoreError`: failures reported by a coordination store implementation
//! - `LockError`: failures surfaced by the lock protocol to callers

use std::time::Duration;

use crate::store::StoreOp;

/// Error reported by a [`CoordinationStore`](crate::store::CoordinationStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("node '{0}' does not exist")]
    NoNode(String),

    #[error("node '{0}' already exists")]
    NodeExists(String),

    #[error("node '{0}' has children")]
    NotEmpty(String),

    #[error("connection to coordination store lost")]
    ConnectionLoss,

    #[error("coordination store session expired")]
    SessionExpired,

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// `NoNode` is expected on release paths that race with another release.
    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode(_))
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists(_))
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(value: anyhow::Error) -> Self {
        StoreError::Other(value.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error surfaced by `LockClient::lock` and `LockHandle::release`.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("store operation {op} failed on '{path}': {source}")]
    StoreOperationFailed {
        op: StoreOp,
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("contender node '{0}' not found among its siblings")]
    ChildNotFound(String),

    #[error("admission limit exceeded for '{resource}': {ahead} contenders ahead, limit {limit}")]
    AdmissionLimitExceeded {
        resource: String,
        ahead: usize,
        limit: usize,
    },

    #[error("lock acquisition for '{resource}' timed out after {timeout:?}")]
    AcquisitionTimedOut { resource: String, timeout: Duration },
}

impl LockError {
    pub(crate) fn store(op: StoreOp, path: impl Into<String>, source: StoreError) -> Self {
        LockError::StoreOperationFailed {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        LockError::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::AcquisitionTimedOut { .. })
    }

    pub fn is_admission_rejected(&self) -> bool {
        matches!(self, LockError::AdmissionLimitExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
