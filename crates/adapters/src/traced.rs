// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced store wrapper for consistent observability

use async_trait::async_trait;
use latch_core::{
    KeyValue, LeaseGrant, LeaseId, LeaseRenewal, RangeResponse, Revision, StoreClient, StoreError,
    WatchStream,
};
use std::time::Duration;
use tracing::Instrument;

/// Wrapper that adds tracing to any StoreClient
#[derive(Clone)]
pub struct TracedStore<S> {
    inner: S,
}

impl<S> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StoreClient> StoreClient for TracedStore<S> {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let span = tracing::debug_span!("store.put", key, lease = ?lease);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.put(key, value, lease).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(revision) => tracing::debug!(revision, elapsed_ms, "put"),
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "put failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let result = self.inner.get(key).await;
        tracing::trace!(
            key,
            found = ?result.as_ref().map(|kv| kv.is_some()).ok(),
            "get"
        );
        result
    }

    async fn range(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let span = tracing::debug_span!("store.range", prefix);
        async {
            let result = self.inner.range(prefix).await;
            match &result {
                Ok(range) => tracing::debug!(count = range.kvs.len(), revision = range.revision, "ranged"),
                Err(e) => tracing::warn!(error = %e, "range failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn delete_if_revision(
        &self,
        key: &str,
        create_revision: Revision,
    ) -> Result<bool, StoreError> {
        let span = tracing::debug_span!("store.delete", key, create_revision);
        async {
            let result = self.inner.delete_if_revision(key, create_revision).await;
            match &result {
                Ok(true) => tracing::debug!("deleted"),
                // A mismatch is routine: the key expired or was already removed
                Ok(false) => tracing::debug!("no matching incarnation"),
                Err(e) => tracing::warn!(error = %e, "delete failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseGrant, StoreError> {
        let span = tracing::info_span!("store.lease_grant", ttl_secs = ttl.as_secs());
        async {
            let start = std::time::Instant::now();
            let result = self.inner.lease_grant(ttl).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(grant) => tracing::info!(lease = %grant.id, elapsed_ms, "lease granted"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "lease grant failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<LeaseRenewal, StoreError> {
        let result = self.inner.lease_keep_alive(lease).await;
        match &result {
            Ok(renewal) => tracing::trace!(lease = %lease, ttl_secs = renewal.ttl.as_secs(), "renewed"),
            Err(e) => tracing::warn!(lease = %lease, error = %e, "keep-alive failed"),
        }
        result
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.lease_revoke", lease = %lease);
        async {
            let result = self.inner.lease_revoke(lease).await;
            // Revoking a lease that already expired is often acceptable
            match &result {
                Ok(()) => tracing::info!("revoked"),
                Err(e) => tracing::warn!(error = %e, "revoke failed (may be expected)"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn watch(&self, key: &str, from_revision: Revision) -> Result<WatchStream, StoreError> {
        let span = tracing::debug_span!("store.watch", key, from_revision);
        async {
            let result = self.inner.watch(key, from_revision).await;
            match &result {
                Ok(_) => tracing::debug!("watch registered"),
                Err(e) => tracing::warn!(error = %e, "watch failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
