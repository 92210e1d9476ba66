// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination primitives over a lease-capable store
//!
//! This module provides:
//! - **LeaseManager** - Lease grant with background keep-alive and loss notification
//! - **Session** - One lease shared by every lock a client takes
//! - **Mutex** - FIFO mutual exclusion ordered by key creation revision
//! - **WatchAdapter** - Blocking wait for key deletion with poll fallback

pub mod lease;
pub mod mutex;
pub mod queue;
pub mod session;
pub mod watch;

pub use lease::{KeepAlive, Lease, LeaseManager, LeaseStatus, LossReason};
pub use mutex::{FencingToken, Mutex, MutexState};
pub use queue::{Turn, Waiter, WaiterQueue};
pub use session::{Session, SessionConfig};
pub use watch::{WatchAdapter, WatchConfig};
