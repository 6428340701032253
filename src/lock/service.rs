//! Lock service contract

use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;

use super::errors::LockResult;
use crate::context::Context;

/// Mutual exclusion scoped to one failover domain.
///
/// Every write to a node's `writable` flag happens while `have_lock()` is
/// true for the writer.
#[async_trait]
pub trait LockService: Send + Sync + fmt::Debug {
    /// Identity recorded as the lease holder.
    fn owner(&self) -> &str;

    /// Block until the lock is held or `ctx` ends.
    ///
    /// Returns `AcquireAborted` promptly on cancellation, without holding
    /// the lock. Not reentrant: a second caller on the same service waits
    /// for the first to release.
    async fn acquire(&self, ctx: &Context) -> LockResult<()>;

    /// Whether the lock is held right now. Never blocks.
    fn have_lock(&self) -> bool;

    /// Wait handle that becomes signaled once the lock is acquired.
    fn lock_acquired(&self) -> LockAcquired;

    /// Give the lock up. `DontHaveLock` if it is not held.
    async fn release(&self) -> LockResult<()>;
}

/// Selectable signal for "the lock is now held".
#[derive(Debug, Clone)]
pub struct LockAcquired {
    rx: watch::Receiver<bool>,
}

impl LockAcquired {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the lock is held. Returns `false` if the lock service
    /// was dropped first.
    pub async fn signaled(&mut self) -> bool {
        self.rx.wait_for(|held| *held).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_resolves_on_acquire() {
        let (tx, rx) = watch::channel(false);
        let mut handle = LockAcquired::new(rx);
        assert!(!handle.is_signaled());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tx.send_replace(true);
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        assert!(handle.signaled().await);
        assert!(handle.is_signaled());
    }

    #[tokio::test]
    async fn test_signal_reports_dropped_service() {
        let (tx, rx) = watch::channel(false);
        let mut handle = LockAcquired::new(rx);
        drop(tx);
        assert!(!handle.signaled().await);
    }
}
