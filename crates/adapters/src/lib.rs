// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Store client adapters for external coordination services

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod traced;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use traced::TracedStore;
