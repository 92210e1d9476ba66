// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waiter ordering under a lock prefix
//!
//! Every contender owns one key under the prefix. The key with the smallest
//! creation revision holds the lock; everyone else waits on the key created
//! immediately before their own.

use crate::store::{KeyValue, LeaseId, Revision};

/// One contender's key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Waiter {
    pub key: String,
    pub create_revision: Revision,
    pub lease: Option<LeaseId>,
}

impl From<&KeyValue> for Waiter {
    fn from(kv: &KeyValue) -> Self {
        Self {
            key: kv.key.clone(),
            create_revision: kv.create_revision,
            lease: kv.lease,
        }
    }
}

/// Outcome of checking one's place in the queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Turn {
    /// Own key has the smallest creation revision
    Acquired { revision: Revision },
    /// Someone is ahead; `predecessor` was created immediately before us
    Wait {
        revision: Revision,
        predecessor: Waiter,
    },
    /// Own key is not in the queue
    Missing,
}

/// Waiters ordered by creation revision
#[derive(Clone, Debug, Default)]
pub struct WaiterQueue {
    waiters: Vec<Waiter>,
}

impl WaiterQueue {
    pub fn from_range(kvs: &[KeyValue]) -> Self {
        let mut waiters: Vec<Waiter> = kvs.iter().map(Waiter::from).collect();
        // Revisions are unique per key; the key breaks ties for malformed input
        waiters.sort_by(|a, b| {
            a.create_revision
                .cmp(&b.create_revision)
                .then_with(|| a.key.cmp(&b.key))
        });
        Self { waiters }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    /// Current holder
    pub fn holder(&self) -> Option<&Waiter> {
        self.waiters.first()
    }

    /// 0-based place of `key`
    pub fn position(&self, key: &str) -> Option<usize> {
        self.waiters.iter().position(|w| w.key == key)
    }

    pub fn turn(&self, own_key: &str) -> Turn {
        let Some(pos) = self.position(own_key) else {
            return Turn::Missing;
        };
        let revision = self.waiters[pos].create_revision;
        match pos.checked_sub(1) {
            None => Turn::Acquired { revision },
            Some(prev) => Turn::Wait {
                revision,
                predecessor: self.waiters[prev].clone(),
            },
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
