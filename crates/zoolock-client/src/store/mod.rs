//! Coordination store contract
//!
//! The lock protocol only needs five node operations from a ZooKeeper-like
//! store. Implementations must assign sequence suffixes atomically, serialize
//! node operations consistently and fire each existence watch at most once.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::StoreResult;

pub use memory::MemoryStore;

/// Path separator of the node namespace.
pub const SEPARATOR: char = '/';

/// Width of the zero-padded sequence suffix appended by sequential creation.
pub const SEQUENCE_WIDTH: usize = 10;

/// Store operations, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Ensure,
    Create,
    List,
    Watch,
    Remove,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Ensure => "ensure_node",
            StoreOp::Create => "create_sequential_ephemeral",
            StoreOp::List => "list_children",
            StoreOp::Watch => "watch_existence",
            StoreOp::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Event delivered when a watched node changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    NodeDeleted,
    NodeDataChanged,
}

/// Receiving side of a single-shot existence watch.
///
/// Resolves to `Err` when the store drops the registration without firing it
/// (connection or session loss).
pub type WatchReceiver = oneshot::Receiver<WatchEvent>;

/// Outcome of registering an existence watch.
#[derive(Debug)]
pub enum ExistenceWatch {
    /// The node was already gone at registration time; nothing will fire.
    Absent,
    /// The node exists and the receiver fires once when it changes.
    Present(WatchReceiver),
}

/// Node operations consumed by the lock protocol.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `path` and any missing ancestors. Succeeds if it already exists.
    async fn ensure_node(&self, path: &str) -> StoreResult<()>;

    /// Create an ephemeral node named `path` plus a store-assigned sequence
    /// suffix and return the full assigned path.
    async fn create_sequential_ephemeral(&self, path: &str) -> StoreResult<String>;

    /// List the names (not paths) of the children of `path`.
    async fn list_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Register a single-shot watch on the existence of `path`.
    async fn watch_existence(&self, path: &str) -> StoreResult<ExistenceWatch>;

    /// Delete `path`. Returns `StoreError::NoNode` if it does not exist.
    async fn remove(&self, path: &str) -> StoreResult<()>;
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{}{}", parent, child)
    } else {
        format!("{}{}{}", parent, SEPARATOR, child)
    }
}

/// Split a node path into its parent path and final segment.
///
/// Returns `None` for paths without a separator.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind(SEPARATOR)?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}
