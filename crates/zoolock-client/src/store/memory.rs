//! Embedded in-process coordination store
//!
//! `MemoryStore` keeps a node tree behind a single mutex so that sequence
//! assignment, listing and deletion are linearizable, which is what the lock
//! protocol relies on. Each handle belongs to a session; closing a session
//! removes its ephemeral nodes and fires their watches, like a store would on
//! client disconnect.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    CoordinationStore, ExistenceWatch, SEPARATOR, SEQUENCE_WIDTH, StoreOp, WatchEvent, split_path,
};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct NodeEntry {
    /// Owning session for ephemeral nodes
    ephemeral_owner: Option<u64>,
    /// Next sequence suffix handed out to children of this node
    next_sequence: u64,
}

struct PendingWatch {
    session: u64,
    tx: oneshot::Sender<WatchEvent>,
}

struct Inner {
    nodes: Mutex<BTreeMap<String, NodeEntry>>,
    watches: DashMap<String, Vec<PendingWatch>>,
    faults: DashMap<StoreOp, VecDeque<StoreError>>,
    empty_listings: AtomicUsize,
    calls: DashMap<StoreOp, u64>,
    next_session: AtomicU64,
}

impl Inner {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(SEPARATOR.to_string(), NodeEntry::default());
        Self {
            nodes: Mutex::new(nodes),
            watches: DashMap::new(),
            faults: DashMap::new(),
            empty_listings: AtomicUsize::new(0),
            calls: DashMap::new(),
            next_session: AtomicU64::new(1),
        }
    }

    fn fire(&self, path: &str, event: WatchEvent) {
        if let Some((_, pending)) = self.watches.remove(path) {
            for watch in pending {
                let _ = watch.tx.send(event);
            }
        }
    }
}

/// In-process [`CoordinationStore`] with ephemeral sessions.
///
/// Cloning shares both the tree and the session; use [`MemoryStore::session`]
/// to open an independent session against the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    session: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Arc::new(Inner::new());
        let session = inner.next_session.fetch_add(1, Ordering::Relaxed);
        Self {
            inner,
            session,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a new session sharing this store's node tree.
    pub fn session(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            session: self.inner.next_session.fetch_add(1, Ordering::Relaxed),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close this session: its ephemeral nodes are deleted, watchers on them
    /// are notified, and watches it registered are dropped unfired.
    pub fn close_session(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let removed: Vec<String> = {
            let mut nodes = self.inner.nodes.lock();
            let owned: Vec<String> = nodes
                .iter()
                .filter(|(_, entry)| entry.ephemeral_owner == Some(self.session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &owned {
                nodes.remove(path);
            }
            owned
        };

        for mut entry in self.inner.watches.iter_mut() {
            entry.value_mut().retain(|w| w.session != self.session);
        }
        for path in &removed {
            self.inner.fire(path, WatchEvent::NodeDeleted);
        }

        debug!(
            "Closed session {} ({} ephemeral nodes removed)",
            self.session,
            removed.len()
        );
    }

    /// Make the next call of `op` fail with `err`. Faults queue per operation.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.inner.faults.entry(op).or_default().push_back(err);
    }

    /// Make the next `times` listings return no children.
    pub fn empty_next_listings(&self, times: usize) {
        self.inner.empty_listings.store(times, Ordering::SeqCst);
    }

    /// Number of calls made for `op` across all sessions.
    pub fn call_count(&self, op: StoreOp) -> u64 {
        self.inner.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Number of unfired watches registered on `path`.
    pub fn pending_watches(&self, path: &str) -> usize {
        self.inner
            .watches
            .get(path)
            .map(|w| w.iter().filter(|p| !p.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.nodes.lock().contains_key(path)
    }

    fn enter(&self, op: StoreOp) -> StoreResult<()> {
        *self.inner.calls.entry(op).or_insert(0) += 1;

        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::SessionExpired);
        }
        if let Some(mut queue) = self.inner.faults.get_mut(&op)
            && let Some(err) = queue.pop_front()
        {
            return Err(err);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn children_of<'a>(
    nodes: &'a BTreeMap<String, NodeEntry>,
    parent: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = if parent.ends_with(SEPARATOR) {
        parent.to_string()
    } else {
        format!("{}{}", parent, SEPARATOR)
    };
    let prefix_len = prefix.len();
    nodes
        .range(prefix.clone()..)
        .map(|(path, _)| path.as_str())
        .take_while(move |path| path.starts_with(&prefix))
        .filter_map(move |path| {
            let rest = &path[prefix_len..];
            (!rest.is_empty() && !rest.contains(SEPARATOR)).then_some(rest)
        })
}

fn validate(path: &str) -> StoreResult<()> {
    if !path.starts_with(SEPARATOR) || (path.len() > 1 && path.ends_with(SEPARATOR)) {
        return Err(StoreError::Other(format!("invalid node path '{}'", path)));
    }
    Ok(())
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ensure_node(&self, path: &str) -> StoreResult<()> {
        self.enter(StoreOp::Ensure)?;
        validate(path)?;

        let mut nodes = self.inner.nodes.lock();
        let mut current = String::new();
        for segment in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
            current.push(SEPARATOR);
            current.push_str(segment);
            nodes.entry(current.clone()).or_default();
        }
        Ok(())
    }

    async fn create_sequential_ephemeral(&self, path: &str) -> StoreResult<String> {
        self.enter(StoreOp::Create)?;
        validate(path)?;

        let (parent, _) = split_path(path)
            .ok_or_else(|| StoreError::Other(format!("invalid node path '{}'", path)))?;

        let mut nodes = self.inner.nodes.lock();
        // close_session may have run since enter(); its sweep holds this lock
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::SessionExpired);
        }
        let parent_entry = nodes
            .get_mut(parent)
            .ok_or_else(|| StoreError::NoNode(parent.to_string()))?;
        let sequence = parent_entry.next_sequence;
        parent_entry.next_sequence += 1;

        let assigned = format!("{}{:0width$}", path, sequence, width = SEQUENCE_WIDTH);
        if nodes.contains_key(&assigned) {
            return Err(StoreError::NodeExists(assigned));
        }
        nodes.insert(
            assigned.clone(),
            NodeEntry {
                ephemeral_owner: Some(self.session),
                next_sequence: 0,
            },
        );
        Ok(assigned)
    }

    async fn list_children(&self, path: &str) -> StoreResult<Vec<String>> {
        self.enter(StoreOp::List)?;
        validate(path)?;

        let nodes = self.inner.nodes.lock();
        if !nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        if self
            .inner
            .empty_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(Vec::new());
        }
        Ok(children_of(&nodes, path).map(str::to_string).collect())
    }

    async fn watch_existence(&self, path: &str) -> StoreResult<ExistenceWatch> {
        self.enter(StoreOp::Watch)?;
        validate(path)?;

        // Hold the tree lock so a concurrent delete cannot slip between the
        // existence check and the registration.
        let nodes = self.inner.nodes.lock();
        if !nodes.contains_key(path) {
            return Ok(ExistenceWatch::Absent);
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .watches
            .entry(path.to_string())
            .or_default()
            .push(PendingWatch {
                session: self.session,
                tx,
            });
        Ok(ExistenceWatch::Present(rx))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.enter(StoreOp::Remove)?;
        validate(path)?;

        {
            let mut nodes = self.inner.nodes.lock();
            if !nodes.contains_key(path) {
                return Err(StoreError::NoNode(path.to_string()));
            }
            if children_of(&nodes, path).next().is_some() {
                return Err(StoreError::NotEmpty(path.to_string()));
            }
            nodes.remove(path);
            self.inner.fire(path, WatchEvent::NodeDeleted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_node_creates_ancestors() {
        let store = MemoryStore::new();
        store.ensure_node("/a/b/c").await.unwrap();
        assert!(store.exists("/a"));
        assert!(store.exists("/a/b"));
        assert!(store.exists("/a/b/c"));

        // Idempotent
        store.ensure_node("/a/b/c").await.unwrap();
        assert_eq!(store.list_children("/a/b").await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_sequential_suffix_is_per_parent_and_padded() {
        let store = MemoryStore::new();
        store.ensure_node("/locks").await.unwrap();
        store.ensure_node("/other").await.unwrap();

        let first = store.create_sequential_ephemeral("/locks/hello").await.unwrap();
        let second = store.create_sequential_ephemeral("/locks/world").await.unwrap();
        let other = store.create_sequential_ephemeral("/other/hello").await.unwrap();

        assert_eq!(first, "/locks/hello0000000000");
        assert_eq!(second, "/locks/world0000000001");
        assert_eq!(other, "/other/hello0000000000");
    }

    #[tokio::test]
    async fn test_create_without_parent_fails() {
        let store = MemoryStore::new();
        let err = store
            .create_sequential_ephemeral("/missing/hello")
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NoNode("/missing".to_string()));
    }

    #[tokio::test]
    async fn test_list_children_only_direct() {
        let store = MemoryStore::new();
        store.ensure_node("/locks/nested/deep").await.unwrap();
        store.create_sequential_ephemeral("/locks/a").await.unwrap();

        let mut children = store.list_children("/locks").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["a0000000000", "nested"]);

        let err = store.list_children("/nope").await.unwrap_err();
        assert!(err.is_no_node());
    }

    #[tokio::test]
    async fn test_watch_fires_on_remove() {
        let store = MemoryStore::new();
        store.ensure_node("/locks").await.unwrap();
        let node = store.create_sequential_ephemeral("/locks/a").await.unwrap();

        let watch = store.watch_existence(&node).await.unwrap();
        let ExistenceWatch::Present(rx) = watch else {
            panic!("expected a live watch");
        };
        assert_eq!(store.pending_watches(&node), 1);

        store.remove(&node).await.unwrap();
        assert_eq!(rx.await.unwrap(), WatchEvent::NodeDeleted);
        assert_eq!(store.pending_watches(&node), 0);

        let err = store.remove(&node).await.unwrap_err();
        assert!(err.is_no_node());
    }

    #[tokio::test]
    async fn test_watch_on_absent_node() {
        let store = MemoryStore::new();
        let watch = store.watch_existence("/ghost").await.unwrap();
        assert!(matches!(watch, ExistenceWatch::Absent));
    }

    #[tokio::test]
    async fn test_remove_non_empty_fails() {
        let store = MemoryStore::new();
        store.ensure_node("/locks/child").await.unwrap();
        let err = store.remove("/locks").await.unwrap_err();
        assert_eq!(err, StoreError::NotEmpty("/locks".to_string()));
    }

    #[tokio::test]
    async fn test_close_session_removes_ephemerals() {
        let store = MemoryStore::new();
        let other = store.session();
        store.ensure_node("/locks").await.unwrap();

        let mine = store.create_sequential_ephemeral("/locks/a").await.unwrap();
        let theirs = other.create_sequential_ephemeral("/locks/a").await.unwrap();

        let ExistenceWatch::Present(rx) = store.watch_existence(&theirs).await.unwrap() else {
            panic!("expected a live watch");
        };

        other.close_session();
        assert_eq!(rx.await.unwrap(), WatchEvent::NodeDeleted);
        assert!(store.exists(&mine));
        assert!(!store.exists(&theirs));
        assert!(store.exists("/locks"));

        let err = other.list_children("/locks").await.unwrap_err();
        assert_eq!(err, StoreError::SessionExpired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_create_racing_close_session_leaves_no_orphans() {
        let store = MemoryStore::new();
        store.ensure_node("/locks").await.unwrap();

        for _ in 0..20 {
            let session = store.session();
            let creators: Vec<_> = (0..8)
                .map(|_| {
                    let session = session.clone();
                    tokio::spawn(async move {
                        for _ in 0..10 {
                            let _ = session.create_sequential_ephemeral("/locks/hello").await;
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();
            tokio::task::yield_now().await;
            session.close_session();
            for creator in creators {
                creator.await.unwrap();
            }

            // Anything created before the close was swept, nothing after it landed
            assert!(store.list_children("/locks").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_close_session_drops_its_watches() {
        let store = MemoryStore::new();
        let watcher = store.session();
        store.ensure_node("/locks").await.unwrap();
        let node = store.create_sequential_ephemeral("/locks/a").await.unwrap();

        let ExistenceWatch::Present(rx) = watcher.watch_existence(&node).await.unwrap() else {
            panic!("expected a live watch");
        };
        watcher.close_session();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Ensure, StoreError::ConnectionLoss);

        assert_eq!(
            store.ensure_node("/locks").await.unwrap_err(),
            StoreError::ConnectionLoss
        );
        store.ensure_node("/locks").await.unwrap();
        assert_eq!(store.call_count(StoreOp::Ensure), 2);

        store.create_sequential_ephemeral("/locks/a").await.unwrap();
        store.empty_next_listings(1);
        assert!(store.list_children("/locks").await.unwrap().is_empty());
        assert_eq!(store.list_children("/locks").await.unwrap().len(), 1);
    }
}
