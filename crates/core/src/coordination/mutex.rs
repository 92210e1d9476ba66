// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fair distributed mutex
//!
//! Each acquisition writes a fresh key under the lock prefix, attached to the
//! session lease. The store's creation revision orders contenders: the lowest
//! one holds the lock, every other waits for its immediate predecessor to be
//! deleted and then re-reads the whole prefix. Waking only on the predecessor
//! keeps a release from stampeding the queue.
//!
//! State machine:
//!
//! ```text
//! Idle ──lock──► Acquiring ──turn──► Held ──unlock──► Released
//!  ▲                │                                    │
//!  └──cancel/error──┘            ◄──────lock─────────────┘
//! ```

use super::queue::{Turn, WaiterQueue};
use super::session::Session;
use super::watch::{WatchAdapter, WatchConfig};
use crate::error::LockError;
use crate::retry::RetryPolicy;
use crate::store::{Revision, StoreClient, StoreError};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

/// Creation revision of the held key
///
/// Strictly increases across successive holders of a prefix, so downstream
/// services can reject writes carrying an older token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FencingToken(pub Revision);

impl FencingToken {
    pub fn revision(&self) -> Revision {
        self.0
    }
}

impl std::fmt::Display for FencingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a mutex is in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutexState {
    Idle,
    /// Own key written, waiting for its turn
    Acquiring { key: String },
    Held { key: String, revision: Revision },
    Released,
}

impl MutexState {
    pub fn name(&self) -> &'static str {
        match self {
            MutexState::Idle => "idle",
            MutexState::Acquiring { .. } => "acquiring",
            MutexState::Held { .. } => "held",
            MutexState::Released => "released",
        }
    }
}

/// A lock over one key prefix, bound to a session
///
/// Dropping a held mutex does not release it; the key stays until `unlock`
/// or until the session ends. Dropping one mid-acquisition removes its key
/// in the background.
pub struct Mutex<S: StoreClient> {
    session: Session<S>,
    prefix: String,
    state: MutexState,
    watcher: WatchAdapter<S>,
    retry: RetryPolicy,
    header_revision: Revision,
}

impl<S: StoreClient> Mutex<S> {
    pub fn new(session: Session<S>, prefix: &str) -> Self {
        let watcher = WatchAdapter::new(session.store().clone(), WatchConfig::default());
        Self {
            session,
            prefix: normalize_prefix(prefix),
            state: MutexState::Idle,
            watcher,
            retry: RetryPolicy::default(),
            header_revision: 0,
        }
    }

    pub fn with_watch_config(mut self, config: WatchConfig) -> Self {
        self.watcher = WatchAdapter::new(self.session.store().clone(), config);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> &MutexState {
        &self.state
    }

    /// Own key while acquiring or held
    pub fn key(&self) -> Option<&str> {
        match &self.state {
            MutexState::Acquiring { key } | MutexState::Held { key, .. } => Some(key),
            MutexState::Idle | MutexState::Released => None,
        }
    }

    pub fn fencing_token(&self) -> Option<FencingToken> {
        match &self.state {
            MutexState::Held { revision, .. } => Some(FencingToken(*revision)),
            _ => None,
        }
    }

    /// Store revision of the range that granted the lock; 0 before the first acquisition
    pub fn header_revision(&self) -> Revision {
        self.header_revision
    }

    /// Block until the lock is held
    pub async fn lock(&mut self) -> Result<FencingToken, LockError> {
        self.lock_until(std::future::pending::<()>()).await
    }

    /// Block until the lock is held or `cancel` completes
    ///
    /// On cancellation or session loss the pending key is removed and the
    /// mutex returns to idle.
    pub async fn lock_until<F>(&mut self, cancel: F) -> Result<FencingToken, LockError>
    where
        F: Future<Output = ()>,
    {
        let key = self.enqueue().await?;
        tokio::pin!(cancel);

        let outcome = tokio::select! {
            biased;
            reason = self.session.lost() => Err(self.session.terminal_error().unwrap_or(
                LockError::LeaseLost { lease: self.session.lease_id(), reason },
            )),
            _ = &mut cancel => Err(LockError::Cancelled),
            result = self.wait_turn(&key) => result,
        };

        match outcome {
            Ok((revision, header)) => Ok(self.hold(key, revision, header)),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "lock attempt abandoned");
                let _ = self.abandon(key).await;
                Err(e)
            }
        }
    }

    /// Take the lock only if nobody is ahead
    pub async fn try_lock(&mut self) -> Result<FencingToken, LockError> {
        let key = self.enqueue().await?;
        let outcome = match self.range().await {
            Ok((queue, header)) => match queue.turn(&key) {
                Turn::Acquired { revision } => Ok((revision, header)),
                Turn::Wait { .. } => Err(LockError::Locked {
                    holder: queue.holder().map(|w| w.key.clone()).unwrap_or_default(),
                }),
                Turn::Missing => Err(self.missing_key_error(&key)),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok((revision, header)) => Ok(self.hold(key, revision, header)),
            Err(e) => {
                let _ = self.abandon(key).await;
                Err(e)
            }
        }
    }

    /// Release the lock by deleting own key at its exact creation revision
    ///
    /// A key found gone after a retried delete, while the session is still
    /// alive, counts as released: the failed attempt may have committed.
    pub async fn unlock(&mut self) -> Result<(), LockError> {
        let (key, revision) = match &self.state {
            MutexState::Held { key, revision } => (key.clone(), *revision),
            _ => return Err(LockError::NotHeld),
        };

        if let Some(err) = self.session.terminal_error() {
            // Lease-bound keys are normally gone already
            if let Err(e) = self.session.store().delete_if_revision(&key, revision).await {
                tracing::debug!(key = %key, error = %e, "best-effort unlock failed");
            }
            self.state = MutexState::Released;
            return Err(err);
        }

        let store = self.session.store();
        let attempts = AtomicU32::new(0);
        let deleted = self
            .retry
            .run("delete_if_revision", || {
                attempts.fetch_add(1, Ordering::Relaxed);
                store.delete_if_revision(&key, revision)
            })
            .await
            .map_err(|e| self.store_error(e))?;

        self.state = MutexState::Released;
        if deleted {
            tracing::info!(key = %key, revision, "lock released");
            Ok(())
        } else if attempts.load(Ordering::Relaxed) > 1 && self.session.terminal_error().is_none() {
            // A failed attempt may have committed before its reply was lost
            tracing::info!(key = %key, revision, "lock released by an earlier attempt");
            Ok(())
        } else {
            tracing::warn!(key = %key, revision, "lock key vanished before unlock");
            Err(LockError::LockLost { key })
        }
    }

    /// Whether own key still exists as the incarnation this mutex created
    pub async fn is_owner(&self) -> Result<bool, LockError> {
        let MutexState::Held { key, revision } = &self.state else {
            return Ok(false);
        };
        let store = self.session.store();
        let kv = self
            .retry
            .run("get", || store.get(key))
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(kv.is_some_and(|kv| kv.create_revision == *revision))
    }

    /// Check local state, clear a stale key, and write a fresh one
    async fn enqueue(&mut self) -> Result<String, LockError> {
        if let MutexState::Held { key, .. } = &self.state {
            return Err(LockError::AlreadyHeld { key: key.clone() });
        }
        self.session.ensure_alive()?;

        if let MutexState::Acquiring { key } = std::mem::replace(&mut self.state, MutexState::Idle)
        {
            tracing::debug!(key = %key, "removing key from an interrupted acquisition");
            self.abandon(key).await.map_err(|e| self.store_error(e))?;
        }

        let key = self.session.next_key(&self.prefix);
        let lease = self.session.lease_id();
        // Set first so an interrupted put still gets cleaned up
        self.state = MutexState::Acquiring { key: key.clone() };

        let store = self.session.store();
        let put = self
            .retry
            .run("put", || store.put(&key, b"", Some(lease)))
            .await;
        if let Err(e) = put {
            let err = self.store_error(e);
            let _ = self.abandon(key).await;
            return Err(err);
        }

        tracing::debug!(key = %key, lease = %lease, "lock key written");
        Ok(key)
    }

    /// Re-read the prefix until own key is first
    async fn wait_turn(&self, key: &str) -> Result<(Revision, Revision), LockError> {
        loop {
            let (queue, header) = self.range().await?;
            match queue.turn(key) {
                Turn::Acquired { revision } => return Ok((revision, header)),
                Turn::Wait {
                    revision,
                    predecessor,
                } => {
                    tracing::debug!(
                        key,
                        revision,
                        predecessor = %predecessor.key,
                        ahead = queue.position(key).unwrap_or_default(),
                        "waiting on predecessor"
                    );
                    self.watcher
                        .wait_for_delete(&predecessor.key, predecessor.create_revision, header + 1)
                        .await
                        .map_err(|e| self.store_error(e))?;
                }
                Turn::Missing => return Err(self.missing_key_error(key)),
            }
        }
    }

    async fn range(&self) -> Result<(WaiterQueue, Revision), LockError> {
        let store = self.session.store();
        let range = self
            .retry
            .run("range", || store.range(&self.prefix))
            .await
            .map_err(|e| self.store_error(e))?;
        Ok((WaiterQueue::from_range(&range.kvs), range.revision))
    }

    fn hold(&mut self, key: String, revision: Revision, header: Revision) -> FencingToken {
        tracing::info!(key = %key, revision, "lock acquired");
        self.header_revision = header;
        self.state = MutexState::Held { key, revision };
        FencingToken(revision)
    }

    /// Delete a key this mutex gave up on; on failure keep it for the next attempt
    async fn abandon(&mut self, key: String) -> Result<(), StoreError> {
        match delete_current(self.session.store(), &key).await {
            Ok(_) => {
                self.state = MutexState::Idle;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to remove abandoned lock key");
                self.state = MutexState::Acquiring { key };
                Err(e)
            }
        }
    }

    fn missing_key_error(&self, key: &str) -> LockError {
        self.session
            .terminal_error()
            .unwrap_or_else(|| LockError::LockLost {
                key: key.to_string(),
            })
    }

    fn store_error(&self, e: StoreError) -> LockError {
        match e {
            StoreError::LeaseNotFound(lease) => LockError::LeaseLost {
                lease,
                reason: super::LossReason::Expired,
            },
            other => LockError::Connection(other),
        }
    }
}

impl<S: StoreClient> Drop for Mutex<S> {
    fn drop(&mut self) {
        let MutexState::Acquiring { key } = std::mem::replace(&mut self.state, MutexState::Idle)
        else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.session.store().clone();
        handle.spawn(async move {
            if let Err(e) = delete_current(&store, &key).await {
                tracing::debug!(key = %key, error = %e, "cleanup of dropped acquisition failed");
            }
        });
    }
}

/// Delete whatever incarnation of `key` exists now
async fn delete_current<S: StoreClient>(store: &S, key: &str) -> Result<bool, StoreError> {
    match store.get(key).await? {
        Some(kv) => store.delete_if_revision(key, kv.create_revision).await,
        None => Ok(false),
    }
}

fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

#[cfg(test)]
#[path = "mutex_tests.rs"]
mod tests;
