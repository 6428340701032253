//! Lease backends
//!
//! A `LockBackend` is the consensus store that actually arbitrates a lease
//! (etcd, ZooKeeper, consul, ...). Implementations MUST:
//! - enforce a TTL lease that eventually hands ownership over,
//! - verify ownership on renew and release,
//! - bump the domain's generation counter whenever a lease is released so
//!   waiters can wake without polling.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::errors::{LockError, LockResult};

/// Who holds a domain's lease and until when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub holder: String,
    pub expires_at: Instant,
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// The caller now holds the lease.
    Acquired { expires_at: Instant },
    /// Someone else holds an unexpired lease.
    HeldBy(LeaseInfo),
}

/// Lease-based mutual exclusion store.
#[async_trait]
pub trait LockBackend: Send + Sync + fmt::Debug + 'static {
    /// Stable label used in logs, e.g. `"memory"`, `"etcd"`.
    fn backend_type(&self) -> &'static str;

    /// Take the lease if it is free or expired.
    async fn try_acquire(&self, domain: &str, owner: &str, ttl: Duration) -> LockResult<LeaseState>;

    /// Extend a lease the caller still holds. `LeaseLost` otherwise.
    async fn renew(&self, domain: &str, owner: &str, ttl: Duration) -> LockResult<Instant>;

    /// Give the lease up. `DontHaveLock` if the caller is not the holder.
    async fn release(&self, domain: &str, owner: &str) -> LockResult<()>;

    /// The current unexpired holder, if any.
    async fn current_holder(&self, domain: &str) -> LockResult<Option<LeaseInfo>>;

    /// Release notifications for `domain`, as a generation counter.
    fn subscribe(&self, domain: &str) -> watch::Receiver<u64>;
}

struct Domain {
    lease: Option<LeaseInfo>,
    generation: watch::Sender<u64>,
}

impl Domain {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            lease: None,
            generation,
        }
    }

    fn live_lease(&self, now: Instant) -> Option<&LeaseInfo> {
        self.lease.as_ref().filter(|l| l.expires_at > now)
    }
}

/// Single-process lease store for tests and simulation.
#[derive(Default)]
pub struct MemoryLockBackend {
    domains: Mutex<HashMap<String, Domain>>,
    unavailable: AtomicBool,
}

impl fmt::Debug for MemoryLockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLockBackend")
            .field("domains", &self.domains.lock().len())
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the backend: every call fails until restored.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> LockResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LockError::backend("memory backend unavailable"))
        } else {
            Ok(())
        }
    }

    fn with_domain<T>(&self, domain: &str, f: impl FnOnce(&mut Domain) -> T) -> T {
        let mut domains = self.domains.lock();
        let entry = domains.entry(domain.to_string()).or_insert_with(Domain::new);
        f(entry)
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire(
        &self,
        domain: &str,
        owner: &str,
        ttl: Duration,
    ) -> LockResult<LeaseState> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self.with_domain(domain, |d| {
            if let Some(held) = d.live_lease(now) {
                return LeaseState::HeldBy(held.clone());
            }
            let expires_at = now + ttl;
            d.lease = Some(LeaseInfo {
                holder: owner.to_string(),
                expires_at,
            });
            LeaseState::Acquired { expires_at }
        }))
    }

    async fn renew(&self, domain: &str, owner: &str, ttl: Duration) -> LockResult<Instant> {
        self.check_available()?;
        let now = Instant::now();
        self.with_domain(domain, |d| match d.lease.as_mut() {
            Some(lease) if lease.holder == owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(lease.expires_at)
            }
            _ => Err(LockError::LeaseLost),
        })
    }

    async fn release(&self, domain: &str, owner: &str) -> LockResult<()> {
        self.check_available()?;
        let now = Instant::now();
        self.with_domain(domain, |d| {
            match d.live_lease(now) {
                Some(lease) if lease.holder == owner => {}
                _ => return Err(LockError::DontHaveLock),
            }
            d.lease = None;
            d.generation.send_modify(|g| *g += 1);
            Ok(())
        })
    }

    async fn current_holder(&self, domain: &str) -> LockResult<Option<LeaseInfo>> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self.with_domain(domain, |d| d.live_lease(now).cloned()))
    }

    fn subscribe(&self, domain: &str) -> watch::Receiver<u64> {
        self.with_domain(domain, |d| d.generation.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_second_owner_sees_holder() {
        let backend = MemoryLockBackend::new();

        let first = backend.try_acquire("d", "a", TTL).await.unwrap();
        assert!(matches!(first, LeaseState::Acquired { .. }));

        match backend.try_acquire("d", "b", TTL).await.unwrap() {
            LeaseState::HeldBy(info) => assert_eq!(info.holder, "a"),
            other => panic!("expected HeldBy, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_domains_are_independent() {
        let backend = MemoryLockBackend::new();
        backend.try_acquire("d1", "a", TTL).await.unwrap();
        let other = backend.try_acquire("d2", "b", TTL).await.unwrap();
        assert!(matches!(other, LeaseState::Acquired { .. }));
    }

    #[tokio::test]
    async fn test_release_verifies_owner() {
        let backend = MemoryLockBackend::new();
        backend.try_acquire("d", "a", TTL).await.unwrap();

        assert_eq!(backend.release("d", "b").await, Err(LockError::DontHaveLock));
        assert_eq!(
            backend.current_holder("d").await.unwrap().map(|l| l.holder),
            Some("a".to_string())
        );

        backend.release("d", "a").await.unwrap();
        assert!(backend.current_holder("d").await.unwrap().is_none());
        assert_eq!(backend.release("d", "a").await, Err(LockError::DontHaveLock));
    }

    #[tokio::test]
    async fn test_release_bumps_generation() {
        let backend = MemoryLockBackend::new();
        let rx = backend.subscribe("d");
        backend.try_acquire("d", "a", TTL).await.unwrap();
        backend.release("d", "a").await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let backend = MemoryLockBackend::new();
        backend
            .try_acquire("d", "a", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(backend.renew("d", "a", TTL).await, Err(LockError::LeaseLost));
        let state = backend.try_acquire("d", "b", TTL).await.unwrap();
        assert!(matches!(state, LeaseState::Acquired { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_calls() {
        let backend = MemoryLockBackend::new();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.try_acquire("d", "a", TTL).await,
            Err(LockError::Backend(_))
        ));
        backend.set_unavailable(false);
        assert!(backend.try_acquire("d", "a", TTL).await.is_ok());
    }
}
