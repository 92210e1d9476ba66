// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store client seam
//!
//! Everything the mutex needs from the coordination store: keyed puts and
//! reads, prefix ranges, compare-and-delete, leases and per-key watches.
//! Implementations must be linearizable; the mutex relies on creation
//! revisions forming a single total order.

mod memory;

pub use memory::{MemoryStore, StoreCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Store revision: a global counter bumped by every mutation
pub type Revision = i64;

/// Lease identifier issued by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl std::fmt::LowerHex for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

// =============================================================================
// Records
// =============================================================================

/// A stored key with its revision metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision of the put that created this incarnation of the key
    pub create_revision: Revision,
    /// Revision of the last put to this key
    pub mod_revision: Revision,
    /// Number of puts since creation
    pub version: i64,
    pub lease: Option<LeaseId>,
}

/// Result of a prefix range
#[derive(Clone, Debug, Default)]
pub struct RangeResponse {
    /// Matching keys in ascending key order
    pub kvs: Vec<KeyValue>,
    /// Store revision the range was served at
    pub revision: Revision,
}

/// A freshly granted lease
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseGrant {
    pub id: LeaseId,
    pub ttl: Duration,
    pub revision: Revision,
}

/// Acknowledgement of one keep-alive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseRenewal {
    /// Remaining TTL granted by the store; zero means the lease is gone
    pub ttl: Duration,
    pub revision: Revision,
}

/// Kind of change reported by a watch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One change to a watched key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    /// Key state after the change; for deletes only `key` and `mod_revision` are meaningful
    pub kv: KeyValue,
    pub revision: Revision,
}

impl WatchEvent {
    /// Whether this event means the incarnation created at `create_revision` no longer exists
    pub fn ends_incarnation(&self, create_revision: Revision) -> bool {
        match self.kind {
            EventKind::Delete => true,
            EventKind::Put => self.kv.create_revision != create_revision,
        }
    }
}

/// Stream of watch events; the channel closing means the watch ended
pub type WatchStream = mpsc::UnboundedReceiver<Result<WatchEvent, StoreError>>;

// =============================================================================
// Errors
// =============================================================================

/// Errors from store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),
    #[error("revision {requested} has been compacted (compacted through {compacted})")]
    Compacted {
        requested: Revision,
        compacted: Revision,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Errors worth retrying: the request may succeed once the store is reachable again
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

// =============================================================================
// Client trait
// =============================================================================

/// Client for a linearizable key-value store with leases and watches
#[async_trait]
pub trait StoreClient: Clone + Send + Sync + 'static {
    /// Write `key`, optionally attached to `lease`; returns the revision of the write
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError>;

    /// Read one key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// All keys starting with `prefix`, ascending by key
    async fn range(&self, prefix: &str) -> Result<RangeResponse, StoreError>;

    /// Delete `key` only if its creation revision matches; returns whether it was deleted
    async fn delete_if_revision(
        &self,
        key: &str,
        create_revision: Revision,
    ) -> Result<bool, StoreError>;

    /// Grant a new lease
    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseGrant, StoreError>;

    /// Renew a lease once
    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<LeaseRenewal, StoreError>;

    /// Revoke a lease, deleting every key attached to it
    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Watch one key for changes at or after `from_revision` (0 means from now)
    async fn watch(&self, key: &str, from_revision: Revision) -> Result<WatchStream, StoreError>;
}
