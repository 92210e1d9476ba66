// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for sessions and locks

use crate::coordination::LossReason;
use crate::store::{LeaseId, StoreError};
use thiserror::Error;

/// Errors surfaced by `Session` and `Mutex` operations
#[derive(Debug, Error)]
pub enum LockError {
    /// The store stayed unreachable after bounded retries
    #[error("store connection failed: {0}")]
    Connection(#[from] StoreError),

    /// The session's lease expired or was revoked
    #[error("lease {lease} lost: {reason}")]
    LeaseLost { lease: LeaseId, reason: LossReason },

    /// Own key vanished while the lock was held; prior exclusive work may have overlapped
    #[error("lock key {key} vanished before unlock")]
    LockLost { key: String },

    #[error("mutex already holds {key}")]
    AlreadyHeld { key: String },

    #[error("mutex does not hold the lock")]
    NotHeld,

    #[error("lock acquisition cancelled")]
    Cancelled,

    /// Returned by `try_lock` when another waiter is ahead
    #[error("lock is held by {holder}")]
    Locked { holder: String },

    #[error("session is closed")]
    SessionClosed,
}

impl LockError {
    /// Whether the owning session is unusable after this error
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, LockError::LeaseLost { .. } | LockError::SessionClosed)
    }
}
