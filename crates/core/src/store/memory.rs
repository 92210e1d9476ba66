// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process linearizable store
//!
//! A single mutex serializes every operation, so the store is trivially
//! linearizable. It keeps a bounded event history so watches can start from
//! a past revision, expires leases against a [`Clock`], and exposes fault
//! injection hooks for tests (unavailability, rejected keep-alives, dropped
//! watch channels). Every call is recorded for assertions.

use super::{
    EventKind, KeyValue, LeaseGrant, LeaseId, LeaseRenewal, RangeResponse, Revision, StoreClient,
    StoreError, WatchEvent, WatchStream,
};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events kept for watches that start in the past
const HISTORY_LIMIT: usize = 1024;

/// Recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put {
        key: String,
        lease: Option<LeaseId>,
    },
    Get {
        key: String,
    },
    Range {
        prefix: String,
    },
    DeleteIfRevision {
        key: String,
        create_revision: Revision,
    },
    LeaseGrant {
        ttl: Duration,
    },
    LeaseKeepAlive {
        lease: LeaseId,
    },
    LeaseRevoke {
        lease: LeaseId,
    },
    Watch {
        key: String,
        from_revision: Revision,
    },
}

struct LeaseRecord {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    key: String,
    tx: mpsc::UnboundedSender<Result<WatchEvent, StoreError>>,
}

#[derive(Default)]
struct State {
    revision: Revision,
    /// Highest revision no longer present in `history`
    compacted: Revision,
    kvs: BTreeMap<String, KeyValue>,
    leases: HashMap<LeaseId, LeaseRecord>,
    next_lease: i64,
    history: VecDeque<WatchEvent>,
    watchers: Vec<Watcher>,
    unavailable: bool,
    reject_keep_alives: bool,
    lose_delete_reply: bool,
    calls: Vec<StoreCall>,
}

impl State {
    fn bump(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }

    fn record(&mut self, event: WatchEvent) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in &self.watchers {
            if watcher.key == event.kv.key {
                let _ = watcher.tx.send(Ok(event.clone()));
            }
        }

        self.history.push_back(event);
        while self.history.len() > HISTORY_LIMIT {
            if let Some(old) = self.history.pop_front() {
                self.compacted = old.revision;
            }
        }
    }

    fn remove_key(&mut self, key: &str, revision: Revision) -> Option<KeyValue> {
        let kv = self.kvs.remove(key)?;
        if let Some(record) = kv.lease.and_then(|id| self.leases.get_mut(&id)) {
            record.keys.remove(key);
        }

        let tombstone = KeyValue {
            key: kv.key.clone(),
            value: Vec::new(),
            create_revision: 0,
            mod_revision: revision,
            version: 0,
            lease: None,
        };
        self.record(WatchEvent {
            kind: EventKind::Delete,
            kv: tombstone,
            revision,
        });
        Some(kv)
    }

    /// Remove a lease and every key attached to it, all at one revision
    fn drop_lease(&mut self, lease: LeaseId) -> bool {
        let Some(record) = self.leases.remove(&lease) else {
            return false;
        };
        if !record.keys.is_empty() {
            let revision = self.bump();
            for key in &record.keys {
                self.remove_key(key, revision);
            }
        }
        true
    }

    fn expire(&mut self, clock: &impl Clock) -> Vec<LeaseId> {
        let mut due: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, record)| clock.is_past(record.deadline))
            .map(|(id, _)| *id)
            .collect();
        due.sort();
        for id in &due {
            self.drop_lease(*id);
        }
        due
    }
}

/// In-process store with leases, revisions and watches
#[derive(Clone)]
pub struct MemoryStore<C: Clock = SystemClock> {
    state: Arc<Mutex<State>>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        let state = State {
            revision: 1,
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call, apply injected faults, then expire overdue leases
    fn begin(&self, call: StoreCall) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        state.expire(&self.clock);
        Ok(state)
    }

    /// Expire every lease whose deadline has passed; returns the expired ids
    pub fn expire_leases(&self) -> Vec<LeaseId> {
        self.lock().expire(&self.clock)
    }

    /// Expire leases periodically in the background
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = store.expire_leases();
                if !expired.is_empty() {
                    tracing::debug!(?expired, "memory store expired leases");
                }
            }
        })
    }

    /// Make every subsequent call fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make keep-alives fail with `Unavailable` while other calls succeed
    pub fn reject_keep_alives(&self, reject: bool) {
        self.lock().reject_keep_alives = reject;
    }

    /// Apply the next compare-and-delete but answer it with `Unavailable`,
    /// like a reply lost after the server committed
    pub fn lose_next_delete_reply(&self) {
        self.lock().lose_delete_reply = true;
    }

    /// Close every open watch channel
    pub fn drop_watchers(&self) {
        self.lock().watchers.clear();
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current store revision
    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// Keys under `prefix`, ascending
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .kvs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Ids of live leases, ascending
    pub fn lease_ids(&self) -> Vec<LeaseId> {
        let mut ids: Vec<LeaseId> = self.lock().leases.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of open watch channels
    pub fn watcher_count(&self) -> usize {
        let mut state = self.lock();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[async_trait]
impl<C: Clock> StoreClient for MemoryStore<C> {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.begin(StoreCall::Put {
            key: key.to_string(),
            lease,
        })?;
        if key.is_empty() {
            return Err(StoreError::InvalidRequest("empty key".to_string()));
        }
        if let Some(id) = lease {
            if !state.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }

        let revision = state.bump();
        let previous = state.kvs.get(key).cloned();
        let (create_revision, version) = match &previous {
            Some(kv) => (kv.create_revision, kv.version + 1),
            None => (revision, 1),
        };

        // Re-attach the key if it moves between leases
        if let Some(old) = previous.and_then(|kv| kv.lease) {
            if Some(old) != lease {
                if let Some(record) = state.leases.get_mut(&old) {
                    record.keys.remove(key);
                }
            }
        }
        if let Some(record) = lease.and_then(|id| state.leases.get_mut(&id)) {
            record.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value: value.to_vec(),
            create_revision,
            mod_revision: revision,
            version,
            lease,
        };
        state.kvs.insert(key.to_string(), kv.clone());
        state.record(WatchEvent {
            kind: EventKind::Put,
            kv,
            revision,
        });

        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let state = self.begin(StoreCall::Get {
            key: key.to_string(),
        })?;
        Ok(state.kvs.get(key).cloned())
    }

    async fn range(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let state = self.begin(StoreCall::Range {
            prefix: prefix.to_string(),
        })?;
        let kvs = state
            .kvs
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect();
        Ok(RangeResponse {
            kvs,
            revision: state.revision,
        })
    }

    async fn delete_if_revision(
        &self,
        key: &str,
        create_revision: Revision,
    ) -> Result<bool, StoreError> {
        let mut state = self.begin(StoreCall::DeleteIfRevision {
            key: key.to_string(),
            create_revision,
        })?;
        let matches = state
            .kvs
            .get(key)
            .is_some_and(|kv| kv.create_revision == create_revision);
        if matches {
            let revision = state.bump();
            state.remove_key(key, revision);
        }
        if std::mem::take(&mut state.lose_delete_reply) {
            return Err(StoreError::Unavailable("reply lost".to_string()));
        }
        Ok(matches)
    }

    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseGrant, StoreError> {
        let mut state = self.begin(StoreCall::LeaseGrant { ttl })?;
        if ttl.is_zero() {
            return Err(StoreError::InvalidRequest("lease ttl must be positive".to_string()));
        }
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            LeaseRecord {
                ttl,
                deadline: self.clock.deadline(ttl),
                keys: BTreeSet::new(),
            },
        );
        Ok(LeaseGrant {
            id,
            ttl,
            revision: state.revision,
        })
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<LeaseRenewal, StoreError> {
        let mut state = self.begin(StoreCall::LeaseKeepAlive { lease })?;
        if state.reject_keep_alives {
            return Err(StoreError::Unavailable(
                "keep-alive stream unavailable".to_string(),
            ));
        }
        let Some(record) = state.leases.get_mut(&lease) else {
            return Err(StoreError::LeaseNotFound(lease));
        };
        record.deadline = self.clock.deadline(record.ttl);
        let ttl = record.ttl;
        Ok(LeaseRenewal {
            ttl,
            revision: state.revision,
        })
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.begin(StoreCall::LeaseRevoke { lease })?;
        if state.drop_lease(lease) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease))
        }
    }

    async fn watch(&self, key: &str, from_revision: Revision) -> Result<WatchStream, StoreError> {
        let mut state = self.begin(StoreCall::Watch {
            key: key.to_string(),
            from_revision,
        })?;
        if from_revision > 0 && from_revision <= state.compacted {
            return Err(StoreError::Compacted {
                requested: from_revision,
                compacted: state.compacted,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if from_revision > 0 {
            for event in state
                .history
                .iter()
                .filter(|e| e.kv.key == key && e.revision >= from_revision)
            {
                let _ = tx.send(Ok(event.clone()));
            }
        }
        state.watchers.push(Watcher {
            key: key.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
