//! Timeout racer and lease timer
//!
//! Timers run as detached tasks racing the acquisition state machine. They
//! hold only a weak reference, so a contender that has been fully dropped is
//! never resurrected by its timer.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::contender::Contender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Fires `timeout_release` if the lock has not been acquired yet
    Acquisition,
    /// Fires `expire` if the lock is still held
    Lease,
}

pub(crate) fn spawn(contender: Weak<Contender>, after: Duration, kind: TimerKind) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let Some(contender) = contender.upgrade() else {
            return;
        };
        match kind {
            TimerKind::Acquisition => contender.timeout_release().await,
            TimerKind::Lease => contender.expire().await,
        }
    })
}
