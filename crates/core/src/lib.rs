// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! latch-core: a fair, lease-bounded distributed mutex
//!
//! This crate provides:
//! - The store client seam (`StoreClient`) and an in-process linearizable store
//! - Lease management with background keep-alive
//! - Sessions that bind a lease to one logical client
//! - A FIFO mutex ordered by store creation revision
//! - Configuration and retry policy shared by all of the above

pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod store;

pub mod coordination;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, LatchConfig};
pub use error::LockError;
pub use retry::RetryPolicy;
pub use store::{
    EventKind, KeyValue, LeaseGrant, LeaseId, LeaseRenewal, MemoryStore, RangeResponse, Revision,
    StoreCall, StoreClient, StoreError, WatchEvent, WatchStream,
};

pub use coordination::{
    FencingToken, KeepAlive, Lease, LeaseManager, LeaseStatus, LossReason, Mutex, MutexState,
    Session, SessionConfig, Turn, Waiter, WaiterQueue, WatchAdapter, WatchConfig,
};
