//! Token returned by a successful `lock()` call

use std::fmt;
use std::sync::Arc;

use super::contender::{Contender, Phase};
use crate::error::Result;

/// A held lock.
///
/// Dropping an unreleased handle schedules a release on the current tokio
/// runtime. Call [`LockHandle::release`] to observe the outcome.
pub struct LockHandle {
    contender: Arc<Contender>,
    path: String,
    sequence: u64,
}

impl LockHandle {
    pub(crate) fn new(contender: Arc<Contender>, path: String, sequence: u64) -> Self {
        Self {
            contender,
            path,
            sequence,
        }
    }

    /// Remove the contender node and cancel any pending timer.
    ///
    /// Calling this again, or after a timer already released the node, is a
    /// no-op that returns `Ok(())`.
    pub async fn release(&self) -> Result<()> {
        self.contender.release().await
    }

    /// Physical path of the contender node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Logical resource path that was locked.
    pub fn resource(&self) -> &str {
        self.contender.resource()
    }

    /// Sequence number assigned by the store.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn phase(&self) -> Phase {
        self.contender.phase()
    }

    /// The node was removed by a timer rather than by `release`.
    pub fn is_timed_out(&self) -> bool {
        self.contender.is_timed_out()
    }

    pub fn is_released(&self) -> bool {
        self.contender.phase() == Phase::Released
    }

    /// Still holding the lock as far as this process knows.
    pub fn is_held(&self) -> bool {
        self.contender.phase() == Phase::Acquired
    }

    /// A lease timer is still pending.
    pub fn has_pending_timer(&self) -> bool {
        self.contender.has_pending_timer()
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("path", &self.path)
            .field("sequence", &self.sequence)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // Skipped when the node is already gone; `release` disarms the timer
        self.contender.release_in_background("lock handle dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::noop;
    use crate::store::{CoordinationStore, MemoryStore, StoreOp};

    async fn handle(store: &MemoryStore) -> LockHandle {
        store.ensure_node("/locks").await.unwrap();
        let path = store
            .create_sequential_ephemeral("/locks/hello")
            .await
            .unwrap();
        let contender = Contender::new(Arc::new(store.clone()), noop(), "/hello");
        contender.set_node(path.clone()).await;
        assert!(contender.try_acquire());
        LockHandle::new(contender, path, 0)
    }

    #[tokio::test]
    async fn test_release_twice() {
        let store = MemoryStore::new();
        let handle = handle(&store).await;
        assert!(handle.is_held());
        assert_eq!(handle.resource(), "/hello");
        assert_eq!(handle.path(), "/locks/hello0000000000");

        handle.release().await.unwrap();
        handle.release().await.unwrap();
        assert!(handle.is_released());
        assert!(!handle.is_timed_out());
        assert_eq!(store.call_count(StoreOp::Remove), 1);
    }

    #[tokio::test]
    async fn test_release_after_lease_expiry() {
        let store = MemoryStore::new();
        let handle = handle(&store).await;

        // What the lease timer does when it fires
        handle.contender.expire().await;
        assert!(handle.is_timed_out());
        assert!(!store.exists(handle.path()));

        handle.release().await.unwrap();
        assert!(handle.is_timed_out());
        assert_eq!(store.call_count(StoreOp::Remove), 1);
    }

    #[tokio::test]
    async fn test_release_does_not_touch_successor() {
        let store = MemoryStore::new();
        let handle = handle(&store).await;
        let successor = store
            .create_sequential_ephemeral("/locks/hello")
            .await
            .unwrap();

        handle.release().await.unwrap();
        handle.release().await.unwrap();
        assert!(store.exists(&successor));
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let store = MemoryStore::new();
        let handle = handle(&store).await;
        let path = handle.path().to_string();

        drop(handle);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while store.exists(&path) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_debug_format() {
        let store = MemoryStore::new();
        let handle = handle(&store).await;
        let debug = format!("{:?}", handle);
        assert!(debug.contains("/locks/hello0000000000"));
        assert!(debug.contains("Acquired"));
    }
}
