// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease lifecycle: grant, background keep-alive, loss notification, revoke
//!
//! A `LeaseManager` owns one store lease. A background task renews it on a
//! fixed interval (always below half the TTL). A renewal the store rejects,
//! or one that keeps failing past the retry budget or past the TTL itself,
//! moves the manager to `Lost`. Lost and revoked are terminal.

use crate::retry::RetryPolicy;
use crate::store::{LeaseId, LeaseRenewal, Revision, StoreClient, StoreError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Why a lease stopped being valid
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LossReason {
    /// The store no longer knows the lease
    Expired,
    /// Revoked by its owner
    Revoked,
    /// Renewals failed until the budget or the TTL ran out
    KeepAliveFailed { attempts: u32, error: String },
}

impl std::fmt::Display for LossReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossReason::Expired => write!(f, "expired"),
            LossReason::Revoked => write!(f, "revoked"),
            LossReason::KeepAliveFailed { attempts, error } => {
                write!(f, "keep-alive failed after {attempts} attempts: {error}")
            }
        }
    }
}

/// Current lease status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseStatus {
    Alive {
        ttl: Duration,
        /// Store revision at the last grant or renewal
        revision: Revision,
    },
    Lost {
        reason: LossReason,
        revision: Revision,
    },
}

impl LeaseStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, LeaseStatus::Alive { .. })
    }

    pub fn revision(&self) -> Revision {
        match self {
            LeaseStatus::Alive { revision, .. } | LeaseStatus::Lost { revision, .. } => *revision,
        }
    }

    pub fn loss_reason(&self) -> Option<LossReason> {
        match self {
            LeaseStatus::Alive { .. } => None,
            LeaseStatus::Lost { reason, .. } => Some(reason.clone()),
        }
    }
}

/// Snapshot of a lease
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl: Duration,
    pub revision: Revision,
}

/// Keep-alive settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepAlive {
    /// Period between renewals
    pub interval: Duration,
    /// Attempts and backoff for a single renewal
    pub renewal: RetryPolicy,
}

impl KeepAlive {
    /// Renewal period for `ttl`: the requested interval when it is below half the TTL,
    /// otherwise a third of the TTL
    pub fn for_ttl(ttl: Duration, requested: Option<Duration>, renewal: RetryPolicy) -> Self {
        let fallback = ttl / 3;
        let interval = match requested {
            Some(i) if !i.is_zero() && i < ttl / 2 => i,
            _ => fallback,
        };
        Self { interval, renewal }
    }
}

/// Owns one lease and keeps it alive
pub struct LeaseManager<S> {
    store: S,
    id: LeaseId,
    ttl: Duration,
    renewal: RetryPolicy,
    status: Arc<watch::Sender<LeaseStatus>>,
    stop: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: StoreClient> LeaseManager<S> {
    /// Grant a fresh lease and start renewing it
    pub async fn grant(store: S, ttl: Duration, keep_alive: KeepAlive) -> Result<Self, StoreError> {
        let grant = keep_alive
            .renewal
            .run("lease_grant", || store.lease_grant(ttl))
            .await?;
        tracing::info!(
            lease = %grant.id,
            ttl_secs = grant.ttl.as_secs(),
            keep_alive_ms = keep_alive.interval.as_millis() as u64,
            "lease granted"
        );
        Ok(Self::start(store, grant.id, grant.ttl, grant.revision, keep_alive))
    }

    /// Take over an existing lease and start renewing it
    pub async fn adopt(store: S, id: LeaseId, keep_alive: KeepAlive) -> Result<Self, StoreError> {
        let renewal = keep_alive
            .renewal
            .run("lease_keep_alive", || store.lease_keep_alive(id))
            .await?;
        if renewal.ttl.is_zero() {
            return Err(StoreError::LeaseNotFound(id));
        }
        tracing::info!(lease = %id, ttl_secs = renewal.ttl.as_secs(), "lease adopted");
        Ok(Self::start(store, id, renewal.ttl, renewal.revision, keep_alive))
    }

    fn start(
        store: S,
        id: LeaseId,
        ttl: Duration,
        revision: Revision,
        keep_alive: KeepAlive,
    ) -> Self {
        let (tx, _) = watch::channel(LeaseStatus::Alive { ttl, revision });
        let status = Arc::new(tx);
        let stop = Arc::new(Notify::new());
        let renewal = keep_alive.renewal.clone();

        let task = tokio::spawn(keep_alive_loop(
            store.clone(),
            id,
            ttl,
            keep_alive,
            Arc::clone(&stop),
            Arc::clone(&status),
        ));

        Self {
            store,
            id,
            ttl,
            renewal,
            status,
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status(&self) -> LeaseStatus {
        self.status.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.status.borrow().is_alive()
    }

    pub fn lease(&self) -> Lease {
        Lease {
            id: self.id,
            ttl: self.ttl,
            revision: self.status.borrow().revision(),
        }
    }

    /// Resolves once the lease is lost or revoked; immediately if it already is
    pub async fn lost(&self) -> LossReason {
        let mut rx = self.status.subscribe();
        let reason = rx
            .wait_for(|status| !status.is_alive())
            .await
            .ok()
            .and_then(|status| status.loss_reason());
        reason.unwrap_or(LossReason::Revoked)
    }

    /// End the lease: stop keep-alive, then revoke it in the store
    ///
    /// Revoking deletes every key attached to the lease. A lease the store
    /// has already dropped counts as revoked.
    pub async fn revoke(&self) -> Result<(), StoreError> {
        self.stop_keep_alive().await;
        mark_lost(&self.status, LossReason::Revoked);

        let result = self
            .renewal
            .run("lease_revoke", || self.store.lease_revoke(self.id))
            .await;
        match result {
            Ok(()) => {
                tracing::info!(lease = %self.id, "lease revoked");
                Ok(())
            }
            Err(StoreError::LeaseNotFound(_)) => {
                tracing::debug!(lease = %self.id, "lease already gone at revoke");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn stop_keep_alive(&self) {
        self.stop.notify_one();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(lease = %self.id, error = %e, "keep-alive task ended abnormally");
            }
        }
    }
}

impl<S> Drop for LeaseManager<S> {
    fn drop(&mut self) {
        // The store expires the lease on its own once renewals stop
        self.stop.notify_one();
    }
}

/// Move to `Lost` unless already terminal; returns whether this call did it
fn mark_lost(status: &watch::Sender<LeaseStatus>, reason: LossReason) -> bool {
    status.send_if_modified(|current| {
        if !current.is_alive() {
            return false;
        }
        let revision = current.revision();
        *current = LeaseStatus::Lost { reason, revision };
        true
    })
}

enum Renewal {
    Renewed(LeaseRenewal),
    Lost(LossReason),
    Stopped,
}

async fn keep_alive_loop<S: StoreClient>(
    store: S,
    id: LeaseId,
    ttl: Duration,
    keep_alive: KeepAlive,
    stop: Arc<Notify>,
    status: Arc<watch::Sender<LeaseStatus>>,
) {
    let mut last_renewal = Instant::now();
    loop {
        tokio::select! {
            _ = stop.notified() => {
                tracing::debug!(lease = %id, "keep-alive stopped");
                return;
            }
            _ = tokio::time::sleep(keep_alive.interval) => {}
        }

        match renew(&store, id, ttl, &keep_alive.renewal, last_renewal, &stop).await {
            Renewal::Renewed(renewal) => {
                last_renewal = Instant::now();
                tracing::trace!(lease = %id, revision = renewal.revision, "lease renewed");
                // Renewals update the value without waking loss observers
                status.send_if_modified(|current| {
                    if current.is_alive() {
                        *current = LeaseStatus::Alive {
                            ttl: renewal.ttl,
                            revision: renewal.revision,
                        };
                    }
                    false
                });
            }
            Renewal::Lost(reason) => {
                if mark_lost(&status, reason.clone()) {
                    tracing::warn!(lease = %id, %reason, "lease lost");
                }
                return;
            }
            Renewal::Stopped => {
                tracing::debug!(lease = %id, "keep-alive stopped during retry");
                return;
            }
        }
    }
}

/// One renewal with bounded retries
async fn renew<S: StoreClient>(
    store: &S,
    id: LeaseId,
    ttl: Duration,
    policy: &RetryPolicy,
    last_renewal: Instant,
    stop: &Notify,
) -> Renewal {
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(ttl, store.lease_keep_alive(id)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(ttl)),
        };
        let error = match result {
            Ok(renewal) if renewal.ttl.is_zero() => return Renewal::Lost(LossReason::Expired),
            Ok(renewal) => return Renewal::Renewed(renewal),
            Err(StoreError::LeaseNotFound(_)) => return Renewal::Lost(LossReason::Expired),
            Err(e) => e,
        };

        attempt += 1;
        let exhausted = !error.is_transient() || attempt >= policy.attempts();
        if exhausted || last_renewal.elapsed() >= ttl {
            return Renewal::Lost(LossReason::KeepAliveFailed {
                attempts: attempt,
                error: error.to_string(),
            });
        }

        let delay = policy.backoff(attempt - 1);
        tracing::debug!(lease = %id, attempt, error = %error, "keep-alive failed, retrying");
        tokio::select! {
            _ = stop.notified() => return Renewal::Stopped,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
