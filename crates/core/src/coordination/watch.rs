// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waiting for a key incarnation to disappear
//!
//! The store watch is the fast path. When the watch cannot be registered or
//! its stream breaks, the adapter checks the key directly, then registers a
//! new watch from just past the revision it last observed, so no deletion
//! can slip between the two.

use crate::retry::RetryPolicy;
use crate::store::{Revision, StoreClient, StoreError};
use std::time::Duration;

/// Watch fallback settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchConfig {
    /// Delay before each existence check while the watch is broken
    pub poll_interval: Duration,
    /// Consecutive store failures tolerated before giving up
    pub retry: RetryPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What a broken watch left us knowing
enum Presence {
    Gone,
    Present { revision: Revision },
}

/// Blocks until a watched key incarnation is deleted
#[derive(Clone)]
pub struct WatchAdapter<S> {
    store: S,
    config: WatchConfig,
}

impl<S: StoreClient> WatchAdapter<S> {
    pub fn new(store: S, config: WatchConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Wait until `key` as created at `create_revision` no longer exists
    ///
    /// Events from `from_revision` onward are considered. Returns early if the
    /// key is already gone or was recreated under a different creation revision.
    pub async fn wait_for_delete(
        &self,
        key: &str,
        create_revision: Revision,
        from_revision: Revision,
    ) -> Result<(), StoreError> {
        let mut from = from_revision;
        let mut failures = 0u32;

        loop {
            match self.store.watch(key, from).await {
                Ok(mut stream) => {
                    failures = 0;
                    tracing::debug!(key, create_revision, from, "watching predecessor");
                    while let Some(item) = stream.recv().await {
                        match item {
                            Ok(event) => {
                                from = from.max(event.revision + 1);
                                if event.ends_incarnation(create_revision) {
                                    tracing::debug!(key, revision = event.revision, "predecessor deleted");
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                tracing::warn!(key, error = %e, "watch stream failed, polling");
                                break;
                            }
                        }
                    }
                    tracing::debug!(key, "watch ended, polling");
                }
                Err(StoreError::Compacted { requested, compacted }) => {
                    tracing::debug!(key, requested, compacted, "watch start compacted, polling");
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures >= self.config.retry.attempts() {
                        return Err(e);
                    }
                    tracing::warn!(key, attempt = failures, error = %e, "watch registration failed, polling");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
            match self.check_presence(key, create_revision).await {
                Ok(Presence::Gone) => {
                    tracing::debug!(key, "predecessor gone on poll");
                    return Ok(());
                }
                Ok(Presence::Present { revision }) => {
                    failures = 0;
                    from = from.max(revision + 1);
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures >= self.config.retry.attempts() {
                        return Err(e);
                    }
                    tracing::warn!(key, attempt = failures, error = %e, "existence poll failed");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check whether the incarnation still exists, and at which store revision
    async fn check_presence(&self, key: &str, create_revision: Revision) -> Result<Presence, StoreError> {
        let range = self.store.range(key).await?;
        let present = range
            .kvs
            .iter()
            .any(|kv| kv.key == key && kv.create_revision == create_revision);
        if present {
            Ok(Presence::Present {
                revision: range.revision,
            })
        } else {
            Ok(Presence::Gone)
        }
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
