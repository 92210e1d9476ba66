// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests for the distributed mutex
//!
//! Several sessions contend over one in-process store: exclusion, FIFO
//! hand-off, cancellation and lease expiry.

use latch_core::{
    FakeClock, FencingToken, LockError, MemoryStore, Mutex, MutexState, Session, SessionConfig,
    StoreClient,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const PREFIX: &str = "/jobs/nightly";
const WAIT: Duration = Duration::from_secs(60);

fn config() -> SessionConfig {
    SessionConfig::new(Duration::from_secs(30))
}

async fn mutex<S: StoreClient>(store: &S) -> Mutex<S> {
    let session = Session::open(store.clone(), &config()).await.unwrap();
    Mutex::new(session, PREFIX)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Lock, record the acquisition, unlock
fn spawn_waiter(
    mut mutex: Mutex<MemoryStore>,
    id: usize,
    order: Arc<std::sync::Mutex<Vec<usize>>>,
) -> JoinHandle<FencingToken> {
    tokio::spawn(async move {
        let token = mutex.lock().await.unwrap();
        order.lock().unwrap().push(id);
        mutex.unlock().await.unwrap();
        token
    })
}

// =============================================================================
// Exclusion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn at_most_one_holder_under_contention() {
    let store = MemoryStore::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let mut mutex = mutex(&store).await;
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let acquisitions = Arc::clone(&acquisitions);
        tasks.push(tokio::spawn(async move {
            for _ in 0..3 {
                mutex.lock().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                acquisitions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                mutex.unlock().await.unwrap();
            }
        }));
    }

    for task in tasks {
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(acquisitions.load(Ordering::SeqCst), 24);
    assert!(store.keys(PREFIX).is_empty());
}

#[tokio::test(start_paused = true)]
async fn fencing_tokens_increase_across_holders() {
    let store = MemoryStore::new();
    let mut previous = FencingToken(0);
    for _ in 0..5 {
        let mut mutex = mutex(&store).await;
        let token = mutex.lock().await.unwrap();
        assert!(token > previous);
        previous = token;
        mutex.unlock().await.unwrap();
    }
}

// =============================================================================
// Fairness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn waiters_acquire_in_arrival_order() {
    let store = MemoryStore::new();
    let mut holder = mutex(&store).await;
    holder.lock().await.unwrap();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for id in 0..5 {
        tasks.push(spawn_waiter(mutex(&store).await, id, Arc::clone(&order)));
        // Let each waiter write its key before the next arrives
        settle().await;
    }

    holder.unlock().await.unwrap();
    let mut tokens = Vec::new();
    for task in tasks {
        tokens.push(tokio::time::timeout(WAIT, task).await.unwrap().unwrap());
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert!(tokens.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_leaves_the_rest_in_order() {
    let store = MemoryStore::new();
    let mut holder = mutex(&store).await;
    holder.lock().await.unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let first = spawn_waiter(mutex(&store).await, 1, Arc::clone(&order));
    settle().await;

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let mut middle = mutex(&store).await;
    let cancelled = tokio::spawn(async move {
        middle
            .lock_until(async {
                let _ = cancel_rx.await;
            })
            .await
    });
    settle().await;

    let last = spawn_waiter(mutex(&store).await, 3, Arc::clone(&order));
    settle().await;
    assert_eq!(store.keys(PREFIX).len(), 4);

    cancel_tx.send(()).unwrap();
    let result = tokio::time::timeout(WAIT, cancelled).await.unwrap().unwrap();
    assert!(matches!(result, Err(LockError::Cancelled)));
    assert_eq!(store.keys(PREFIX).len(), 3);

    holder.unlock().await.unwrap();
    tokio::time::timeout(WAIT, first).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, last).await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn released_lock_passes_straight_to_the_blocked_session() {
    let store = MemoryStore::new();
    let mut a = mutex(&store).await;
    let mut b = mutex(&store).await;

    let a_token = a.lock().await.unwrap();
    let b_pending = tokio::spawn(async move {
        let token = b.lock().await;
        (b, token)
    });
    settle().await;
    assert!(!b_pending.is_finished());

    a.unlock().await.unwrap();
    let (b, b_token) = tokio::time::timeout(WAIT, b_pending).await.unwrap().unwrap();
    let b_token = b_token.unwrap();

    // B's key was written while A held the lock, and nobody else got in between
    assert!(b_token > a_token);
    assert_eq!(store.keys(PREFIX), vec![b.key().unwrap().to_string()]);
    assert!(matches!(b.state(), MutexState::Held { .. }));
}

#[tokio::test(start_paused = true)]
async fn fresh_mutex_on_idle_prefix_acquires_immediately() {
    let store = MemoryStore::new();
    let mut first = mutex(&store).await;
    first.lock().await.unwrap();
    first.unlock().await.unwrap();

    let mut second = mutex(&store).await;
    tokio::time::timeout(Duration::from_millis(1), second.lock())
        .await
        .unwrap()
        .unwrap();
}

// =============================================================================
// Leases
// =============================================================================

#[tokio::test(start_paused = true)]
async fn expired_holder_hands_off_to_next_waiter() {
    let clock = FakeClock::new();
    let store = MemoryStore::with_clock(clock.clone());

    let holder_session = Session::open(store.clone(), &config()).await.unwrap();
    let mut holder = Mutex::new(holder_session.clone(), PREFIX);
    let held = holder.lock().await.unwrap();

    let mut waiter = mutex(&store).await;
    let pending = tokio::spawn(async move { waiter.lock().await });
    settle().await;

    // The holder process dies: renewals stop, its lock key stays
    drop(holder);
    drop(holder_session);

    // The waiter keeps renewing while the holder's lease runs out
    clock.advance(Duration::from_secs(20));
    tokio::time::sleep(Duration::from_secs(11)).await;
    clock.advance(Duration::from_secs(15));
    store.expire_leases();

    let token = tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(token > held);
    assert_eq!(store.keys(PREFIX).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn closing_a_session_releases_all_its_locks() {
    let store = MemoryStore::new();
    let session = Session::open(store.clone(), &config()).await.unwrap();
    let mut a = Mutex::new(session.clone(), "/a");
    let mut b = Mutex::new(session.clone(), "/b");
    a.lock().await.unwrap();
    b.lock().await.unwrap();

    let other = Session::open(store.clone(), &config()).await.unwrap();
    let mut contender = Mutex::new(other, "/b");
    let pending = tokio::spawn(async move { contender.lock().await });
    settle().await;

    session.close().await.unwrap();

    tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(store.keys("/a/").is_empty());
    assert!(matches!(a.unlock().await, Err(LockError::SessionClosed)));
}
