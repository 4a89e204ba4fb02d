//! Shared state of one contender node
//!
//! Every path that can delete the contender node (caller release, timeout,
//! lease expiry, abort, drop) goes through this type. The phase is a single
//! atomic so concurrent paths resolve deterministically. Removal of the node
//! runs under an async mutex held across the store call, so a second remover
//! waits for the first to finish and at most one physical remove succeeds.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;

use super::timer::{self, TimerKind};
use crate::error::{LockError, Result};
use crate::logger::SharedLogger;
use crate::store::{CoordinationStore, StoreOp};

/// Lifecycle phase of a contender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Node being created or waiting for its turn
    Contending = 0,
    /// Rank 0 reached and handed to the caller
    Acquired = 1,
    /// Acquisition timer fired before the lock was acquired
    TimedOut = 2,
    /// Lease timer fired while the lock was held
    Expired = 3,
    /// Released by the caller or by an abort path
    Released = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Contending,
            1 => Phase::Acquired,
            2 => Phase::TimedOut,
            3 => Phase::Expired,
            _ => Phase::Released,
        }
    }

    /// The node was removed by a timer rather than the caller.
    pub fn is_timed_out(self) -> bool {
        matches!(self, Phase::TimedOut | Phase::Expired)
    }
}

pub(crate) struct Contender {
    store: Arc<dyn CoordinationStore>,
    logger: SharedLogger,
    resource: String,
    phase: AtomicU8,
    /// Assigned node path, kept for reporting after removal
    path: OnceLock<String>,
    /// Node path not yet removed
    node: AsyncMutex<Option<String>>,
    cancel: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Contender {
    pub(crate) fn new(
        store: Arc<dyn CoordinationStore>,
        logger: SharedLogger,
        resource: &str,
    ) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            store,
            logger,
            resource: resource.to_string(),
            phase: AtomicU8::new(Phase::Contending as u8),
            path: OnceLock::new(),
            node: AsyncMutex::new(None),
            cancel,
            timer: Mutex::new(None),
        })
    }

    pub(crate) fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub(crate) fn logger(&self) -> &SharedLogger {
        &self.logger
    }

    pub(crate) fn resource(&self) -> &str {
        &self.resource
    }

    pub(crate) fn path(&self) -> Option<&str> {
        self.path.get().map(String::as_str)
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.phase().is_timed_out()
    }

    fn transition(&self, from: Phase, to: Phase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record the node assigned by the store.
    pub(crate) async fn set_node(&self, path: String) {
        let _ = self.path.set(path.clone());
        *self.node.lock().await = Some(path);
    }

    /// The node is known to be gone, or is being removed right now.
    fn node_cleared(&self) -> bool {
        self.node.try_lock().map(|node| node.is_none()).unwrap_or(true)
    }

    /// Move from contending to acquired. Fails if a timer won the race.
    pub(crate) fn try_acquire(&self) -> bool {
        self.transition(Phase::Contending, Phase::Acquired)
    }

    /// Resolves once a timer or release has cancelled the contender.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Remove the node unless it is already gone.
    ///
    /// Waits for a removal already in flight on another task. Returns
    /// `Ok(false)` when there was nothing to remove, including the store
    /// reporting the node already gone. On failure the node stays recorded so
    /// a later call can retry.
    pub(crate) async fn remove_node(&self) -> Result<bool> {
        let mut node = self.node.lock().await;
        let Some(path) = node.clone() else {
            return Ok(false);
        };

        match self.store.remove(&path).await {
            Ok(()) => {
                *node = None;
                Ok(true)
            }
            Err(e) if e.is_no_node() => {
                *node = None;
                self.logger
                    .info(&format!("contender node {} was already removed", path));
                Ok(false)
            }
            Err(e) => Err(LockError::store(StoreOp::Remove, path, e)),
        }
    }

    /// Timer-driven release during acquisition. Sets the flag before removing.
    pub(crate) async fn timeout_release(&self) {
        if !self.transition(Phase::Contending, Phase::TimedOut) {
            return;
        }
        self.cancel.send_replace(true);
        self.logger.info(&format!(
            "timeout reached for {}, releasing {}",
            self.resource,
            self.path().unwrap_or("<pending>")
        ));
        if let Err(e) = self.remove_node().await {
            self.logger
                .error(&format!("failed to release timed out contender: {}", e));
        }
    }

    /// Timer-driven release of a held lock once its lease runs out.
    pub(crate) async fn expire(&self) {
        if !self.transition(Phase::Acquired, Phase::Expired) {
            return;
        }
        self.cancel.send_replace(true);
        self.logger.info(&format!(
            "lease expired for {}, releasing {}",
            self.resource,
            self.path().unwrap_or("<pending>")
        ));
        if let Err(e) = self.remove_node().await {
            self.logger
                .error(&format!("failed to release expired lock: {}", e));
        }
    }

    /// Caller or abort-path release. Idempotent.
    pub(crate) async fn release(&self) -> Result<()> {
        let previous = loop {
            let current = self.phase();
            match current {
                Phase::Contending | Phase::Acquired => {
                    if self.transition(current, Phase::Released) {
                        break current;
                    }
                }
                Phase::TimedOut | Phase::Expired => {
                    // Finishes a timer removal that was cut short
                    if let Err(e) = self.remove_node().await {
                        self.logger
                            .error(&format!("failed to remove timed out node: {}", e));
                    }
                    self.disarm_timer();
                    return Ok(());
                }
                Phase::Released => {
                    self.disarm_timer();
                    return Ok(());
                }
            }
        };

        self.disarm_timer();
        self.cancel.send_replace(true);
        if let Some(path) = self.path() {
            self.logger.info(&format!("releasing lock {}", path));
        }

        if let Err(e) = self.remove_node().await {
            self.phase.store(previous as u8, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Release from a synchronous context by spawning onto the current runtime.
    pub(crate) fn release_in_background(self: &Arc<Self>, reason: &str) {
        match self.phase() {
            Phase::Contending | Phase::Acquired => {}
            Phase::TimedOut | Phase::Expired if !self.node_cleared() => {}
            _ => return,
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.logger.info(&format!(
                    "{}, releasing {} in background",
                    reason,
                    self.path().unwrap_or("<pending>")
                ));
                let contender = self.clone();
                handle.spawn(async move {
                    if let Err(e) = contender.release().await {
                        contender
                            .logger
                            .error(&format!("background release failed: {}", e));
                    }
                });
            }
            Err(_) => {
                self.logger.error(&format!(
                    "{} outside a runtime, {} left to session expiry",
                    reason,
                    self.path().unwrap_or("<pending>")
                ));
            }
        }
    }

    /// Arm a timer, replacing any pending one.
    pub(crate) fn arm_timer(self: &Arc<Self>, after: Duration, kind: TimerKind) {
        let handle = timer::spawn(Arc::downgrade(self), after, kind);
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn disarm_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn has_pending_timer(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Releases the contender if the `lock()` future is dropped mid-acquisition.
pub(crate) struct AbandonGuard {
    contender: Option<Arc<Contender>>,
}

impl AbandonGuard {
    pub(crate) fn new(contender: Arc<Contender>) -> Self {
        Self {
            contender: Some(contender),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.contender = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(contender) = self.contender.take() {
            contender.release_in_background("lock attempt abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::noop;
    use crate::store::MemoryStore;

    async fn contender_with_node(store: &MemoryStore) -> (Arc<Contender>, String) {
        store.ensure_node("/locks").await.unwrap();
        let path = store
            .create_sequential_ephemeral("/locks/hello")
            .await
            .unwrap();
        let contender = Contender::new(Arc::new(store.clone()), noop(), "/hello");
        contender.set_node(path.clone()).await;
        (contender, path)
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        assert!(contender.try_acquire());
        contender.release().await.unwrap();
        assert!(!store.exists(&path));
        assert_eq!(contender.phase(), Phase::Released);

        contender.release().await.unwrap();
        assert_eq!(store.call_count(StoreOp::Remove), 1);
    }

    #[tokio::test]
    async fn test_timeout_release_sets_flag_and_blocks_acquire() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        contender.timeout_release().await;
        assert!(contender.is_timed_out());
        assert!(!store.exists(&path));
        assert!(!contender.try_acquire());

        // Caller release after a timeout is a silent no-op
        contender.release().await.unwrap();
        assert_eq!(contender.phase(), Phase::TimedOut);
        assert_eq!(store.call_count(StoreOp::Remove), 1);
    }

    #[tokio::test]
    async fn test_timeout_after_acquire_is_noop() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        assert!(contender.try_acquire());
        contender.timeout_release().await;
        assert_eq!(contender.phase(), Phase::Acquired);
        assert!(store.exists(&path));
    }

    #[tokio::test]
    async fn test_expire_only_from_acquired() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        contender.expire().await;
        assert_eq!(contender.phase(), Phase::Contending);

        assert!(contender.try_acquire());
        contender.expire().await;
        assert_eq!(contender.phase(), Phase::Expired);
        assert!(contender.is_timed_out());
        assert!(!store.exists(&path));
    }

    #[tokio::test]
    async fn test_node_removed_elsewhere_is_tolerated() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        store.remove(&path).await.unwrap();
        assert!(!contender.remove_node().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_release_can_be_retried() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;
        assert!(contender.try_acquire());

        store.fail_next(StoreOp::Remove, crate::error::StoreError::ConnectionLoss);
        let err = contender.release().await.unwrap_err();
        assert!(matches!(err, LockError::StoreOperationFailed { .. }));
        assert_eq!(contender.phase(), Phase::Acquired);
        assert!(store.exists(&path));

        contender.release().await.unwrap();
        assert!(!store.exists(&path));
    }

    #[tokio::test]
    async fn test_release_finishes_failed_timer_removal() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        store.fail_next(StoreOp::Remove, crate::error::StoreError::ConnectionLoss);
        contender.timeout_release().await;
        assert!(contender.is_timed_out());
        assert!(store.exists(&path));

        contender.release().await.unwrap();
        assert!(!store.exists(&path));
        assert_eq!(contender.phase(), Phase::TimedOut);
        assert_eq!(store.call_count(StoreOp::Remove), 2);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_timeout() {
        let store = MemoryStore::new();
        let (contender, _) = contender_with_node(&store).await;

        let waiter = {
            let contender = contender.clone();
            tokio::spawn(async move { contender.cancelled().await })
        };
        contender.timeout_release().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_abandon_guard_releases() {
        let store = MemoryStore::new();
        let (contender, path) = contender_with_node(&store).await;

        drop(AbandonGuard::new(contender.clone()));
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.exists(&path) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(contender.phase(), Phase::Released);
    }
}
