// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session: one lease shared by every lock a client takes
//!
//! Lock keys are attached to the session lease, so when the process dies the
//! store reclaims them once the TTL runs out. Closing the session revokes the
//! lease, which releases every lock created under it at once.

use super::lease::{KeepAlive, Lease, LeaseManager, LeaseStatus, LossReason};
use crate::error::LockError;
use crate::retry::RetryPolicy;
use crate::store::{LeaseId, StoreClient, StoreError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Session lease settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Lease TTL
    pub ttl: Duration,
    /// Keep-alive period; `None` uses a third of the TTL
    pub keep_alive_interval: Option<Duration>,
    /// Retry budget for one renewal
    pub renewal: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SessionConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keep_alive_interval: None,
            renewal: RetryPolicy::default(),
        }
    }

    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_renewal(mut self, renewal: RetryPolicy) -> Self {
        self.renewal = renewal;
        self
    }

    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive::for_ttl(self.ttl, self.keep_alive_interval, self.renewal.clone())
    }
}

/// A lease-bound client identity; clones share the same lease
#[derive(Clone)]
pub struct Session<S> {
    inner: Arc<SessionInner<S>>,
}

struct SessionInner<S> {
    lease: LeaseManager<S>,
    closed: AtomicBool,
    revoked: AtomicBool,
    next_key: AtomicU64,
}

impl<S: StoreClient> Session<S> {
    /// Grant a lease and start keeping it alive
    pub async fn open(store: S, config: &SessionConfig) -> Result<Self, LockError> {
        let lease = LeaseManager::grant(store, config.ttl, config.keep_alive()).await?;
        Ok(Self::wrap(lease))
    }

    /// Build a session around a lease granted elsewhere
    pub async fn from_lease(
        store: S,
        lease: LeaseId,
        config: &SessionConfig,
    ) -> Result<Self, LockError> {
        match LeaseManager::adopt(store, lease, config.keep_alive()).await {
            Ok(manager) => Ok(Self::wrap(manager)),
            Err(StoreError::LeaseNotFound(id)) => Err(LockError::LeaseLost {
                lease: id,
                reason: LossReason::Expired,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn wrap(lease: LeaseManager<S>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                lease,
                closed: AtomicBool::new(false),
                revoked: AtomicBool::new(false),
                next_key: AtomicU64::new(0),
            }),
        }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.inner.lease.id()
    }

    pub fn lease(&self) -> Lease {
        self.inner.lease.lease()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.lease.ttl()
    }

    pub fn status(&self) -> LeaseStatus {
        self.inner.lease.status()
    }

    pub fn store(&self) -> &S {
        self.inner.lease.store()
    }

    /// Not closed and the lease is still valid
    pub fn is_alive(&self) -> bool {
        !self.is_closed() && self.inner.lease.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the lease is lost or the session closed
    pub async fn lost(&self) -> LossReason {
        self.inner.lease.lost().await
    }

    /// Revoke the lease, releasing every lock held under it; idempotent
    ///
    /// The session refuses new locks from the first call on. A revoke that
    /// fails is attempted again by the next `close`.
    pub async fn close(&self) -> Result<(), LockError> {
        self.inner.closed.store(true, Ordering::Release);
        if self.inner.revoked.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.lease.revoke().await?;
        if !self.inner.revoked.swap(true, Ordering::AcqRel) {
            tracing::info!(lease = %self.lease_id(), "session closed");
        }
        Ok(())
    }

    /// Error out unless the session can still take and hold locks
    pub(crate) fn ensure_alive(&self) -> Result<(), LockError> {
        if self.is_closed() {
            return Err(LockError::SessionClosed);
        }
        match self.inner.lease.status().loss_reason() {
            Some(reason) => Err(LockError::LeaseLost {
                lease: self.lease_id(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// The error matching why the session stopped, if it has
    pub(crate) fn terminal_error(&self) -> Option<LockError> {
        self.ensure_alive().err()
    }

    /// A key under `prefix` no other lock in any session will use
    pub(crate) fn next_key(&self, prefix: &str) -> String {
        let n = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{:016x}-{n}", self.lease_id())
    }
}

impl<S: StoreClient> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lease", &self.lease_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
