//! Lease-backed lock service
//!
//! `LeaseLock` turns a `LockBackend` into a `LockService`:
//! - acquisition waits on release notifications and lease expiry, never
//!   on a fixed poll,
//! - a keep-alive task renews the lease while it is held,
//! - local possession lapses at the last known expiry even if the
//!   keep-alive cannot reach the backend.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{LockBackend, LeaseState};
use super::config::LockConfig;
use super::errors::{LockError, LockResult};
use super::service::{LockAcquired, LockService};
use crate::context::Context;

/// Locally known possession of the lease.
struct Possession {
    expires_at: Mutex<Option<Instant>>,
    signal: watch::Sender<bool>,
}

impl Possession {
    fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            expires_at: Mutex::new(None),
            signal,
        }
    }

    fn is_held(&self) -> bool {
        matches!(*self.expires_at.lock(), Some(exp) if Instant::now() < exp)
    }

    fn grant(&self, expires_at: Instant) {
        *self.expires_at.lock() = Some(expires_at);
        self.signal.send_replace(true);
    }

    fn extend(&self, expires_at: Instant) -> bool {
        let mut current = self.expires_at.lock();
        match *current {
            Some(exp) if Instant::now() < exp => {
                *current = Some(expires_at);
                true
            }
            _ => false,
        }
    }

    /// Drop possession, returning whether it was still valid.
    fn clear(&self) -> bool {
        let was_held = matches!(
            self.expires_at.lock().take(),
            Some(exp) if Instant::now() < exp
        );
        self.signal.send_replace(false);
        was_held
    }
}

/// `LockService` over a pluggable lease backend.
pub struct LeaseLock {
    backend: Arc<dyn LockBackend>,
    domain: String,
    owner: String,
    config: LockConfig,
    session: Option<Context>,
    possession: Arc<Possession>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    acquiring: tokio::sync::Mutex<()>,
}

impl fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseLock")
            .field("backend", &self.backend.backend_type())
            .field("domain", &self.domain)
            .field("owner", &self.owner)
            .field("held", &self.possession.is_held())
            .finish()
    }
}

impl LeaseLock {
    pub fn new(
        backend: Arc<dyn LockBackend>,
        domain: impl Into<String>,
        owner: impl Into<String>,
        config: LockConfig,
    ) -> Self {
        Self {
            backend,
            domain: domain.into(),
            owner: owner.into(),
            config,
            session: None,
            possession: Arc::new(Possession::new()),
            keepalive: Mutex::new(None),
            acquiring: tokio::sync::Mutex::new(()),
        }
    }

    /// Tie the lease to a session. When `session` ends the keep-alive
    /// stops and the lease is released.
    pub fn with_session(mut self, session: Context) -> Self {
        self.session = Some(session);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Stop renewing and forget possession without telling the backend.
    ///
    /// Models a coordinator crash: the lease stays with this owner until
    /// it expires.
    pub fn abandon(&self) {
        self.stop_keepalive();
        self.possession.clear();
        warn!(domain = %self.domain, owner = %self.owner, "lease abandoned without release");
    }

    fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backend_retry_ms.max(1);
        let exp = base.saturating_mul(1u64 << attempt.min(6));
        let capped = exp.min(self.config.lease_ttl_ms.max(base));
        let jitter = rand::thread_rng().gen_range(0..=capped / 2);
        Duration::from_millis(capped / 2 + jitter)
    }

    fn on_acquired(&self, expires_at: Instant) {
        self.possession.grant(expires_at);
        self.stop_keepalive();

        let keepalive = KeepAlive {
            backend: Arc::clone(&self.backend),
            domain: self.domain.clone(),
            owner: self.owner.clone(),
            ttl: self.config.lease_ttl(),
            interval: self.config.renew_interval(),
            release_timeout: self.config.release_timeout(),
            session: self.session.clone(),
            possession: Arc::clone(&self.possession),
        };
        *self.keepalive.lock() = Some(tokio::spawn(keepalive.run()));

        info!(domain = %self.domain, owner = %self.owner, "lock acquired");
    }
}

struct KeepAlive {
    backend: Arc<dyn LockBackend>,
    domain: String,
    owner: String,
    ttl: Duration,
    interval: Duration,
    release_timeout: Duration,
    session: Option<Context>,
    possession: Arc<Possession>,
}

impl KeepAlive {
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        loop {
            let session_ended = match &self.session {
                Some(session) => tokio::select! {
                    _ = session.done() => true,
                    _ = ticker.tick() => false,
                },
                None => {
                    ticker.tick().await;
                    false
                }
            };

            if !self.possession.is_held() {
                self.possession.clear();
                warn!(domain = %self.domain, owner = %self.owner, "lease lapsed before renewal");
                return;
            }

            if session_ended {
                self.possession.clear();
                let release = self.backend.release(&self.domain, &self.owner);
                let released = tokio::time::timeout(self.release_timeout, release).await;
                match released {
                    Ok(Ok(())) => info!(domain = %self.domain, "session ended, lock released"),
                    Ok(Err(e)) => {
                        warn!(domain = %self.domain, error = %e, "session ended, release failed")
                    }
                    Err(_) => warn!(domain = %self.domain, "session ended, release timed out"),
                }
                return;
            }

            match self.backend.renew(&self.domain, &self.owner, self.ttl).await {
                Ok(expires_at) => {
                    if !self.possession.extend(expires_at) {
                        return;
                    }
                    debug!(domain = %self.domain, "lease renewed");
                }
                Err(LockError::LeaseLost) => {
                    self.possession.clear();
                    warn!(domain = %self.domain, owner = %self.owner, "lease lost");
                    return;
                }
                Err(e) => {
                    warn!(domain = %self.domain, error = %e, "lease renewal failed, retrying");
                }
            }
        }
    }
}

#[async_trait]
impl LockService for LeaseLock {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn acquire(&self, ctx: &Context) -> LockResult<()> {
        let _guard = ctx
            .run(self.acquiring.lock())
            .await
            .map_err(LockError::AcquireAborted)?;

        if let Some(err) = self.session.as_ref().and_then(Context::err) {
            return Err(LockError::AcquireAborted(err));
        }

        let mut releases = self.backend.subscribe(&self.domain);
        let mut failures = 0u32;

        loop {
            if let Some(err) = ctx.err() {
                return Err(LockError::AcquireAborted(err));
            }

            let attempt = ctx
                .run(self.backend.try_acquire(&self.domain, &self.owner, self.config.lease_ttl()))
                .await
                .map_err(LockError::AcquireAborted)?;

            let wake_at = match attempt {
                Ok(LeaseState::Acquired { expires_at }) => {
                    self.on_acquired(expires_at);
                    return Ok(());
                }
                Ok(LeaseState::HeldBy(info)) => {
                    failures = 0;
                    debug!(domain = %self.domain, holder = %info.holder, "lock held, waiting");
                    info.expires_at
                }
                Err(e) => {
                    let delay = self.backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        domain = %self.domain,
                        error = %e,
                        ?delay,
                        "lock backend error, backing off"
                    );
                    Instant::now() + delay
                }
            };

            tokio::select! {
                err = ctx.done() => return Err(LockError::AcquireAborted(err)),
                Ok(()) = releases.changed() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn have_lock(&self) -> bool {
        self.possession.is_held()
    }

    fn lock_acquired(&self) -> LockAcquired {
        LockAcquired::new(self.possession.signal.subscribe())
    }

    async fn release(&self) -> LockResult<()> {
        self.stop_keepalive();
        if !self.possession.clear() {
            return Err(LockError::DontHaveLock);
        }

        let released = tokio::time::timeout(
            self.config.release_timeout(),
            self.backend.release(&self.domain, &self.owner),
        )
        .await
        .map_err(|_| LockError::LockTimeout)?;

        if released.is_ok() {
            info!(domain = %self.domain, owner = %self.owner, "lock released");
        }
        released
    }
}

impl Drop for LeaseLock {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}
