// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use latch_core::{MemoryStore, SessionConfig};

async fn session(store: &MemoryStore) -> Session<MemoryStore> {
    Session::open(store.clone(), &SessionConfig::new(Duration::from_secs(30)))
        .await
        .unwrap()
}

fn args(duration: Duration, wait: Option<Duration>) -> HoldArgs {
    HoldArgs { duration, wait }
}

#[tokio::test(start_paused = true)]
async fn free_prefix_is_held_then_released() {
    let store = MemoryStore::new();
    let session = session(&store).await;
    let mut mutex = Mutex::new(session.clone(), "/hold");

    let outcome = hold(&mut mutex, &session, &args(Duration::from_millis(50), None))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Released);
    assert!(store.keys("/hold/").is_empty());
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_wait_limit_without_leaving_a_key() {
    let store = MemoryStore::new();
    let mut holder = Mutex::new(session(&store).await, "/hold");
    holder.lock().await.unwrap();
    let held = holder.key().unwrap().to_string();

    let session = session(&store).await;
    let mut waiter = Mutex::new(session.clone(), "/hold");
    let outcome = hold(
        &mut waiter,
        &session,
        &args(Duration::from_secs(5), Some(Duration::from_millis(200))),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::GaveUp);
    assert_eq!(waiter.state().name(), "idle");
    assert_eq!(store.keys("/hold/"), vec![held]);
}

#[tokio::test(start_paused = true)]
async fn acquires_when_holder_releases_within_the_limit() {
    let store = MemoryStore::new();
    let mut holder = Mutex::new(session(&store).await, "/hold");
    holder.lock().await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.unlock().await.unwrap();
    });

    let session = session(&store).await;
    let mut waiter = Mutex::new(session.clone(), "/hold");
    let outcome = hold(
        &mut waiter,
        &session,
        &args(Duration::from_millis(50), Some(Duration::from_secs(5))),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::Released);
    assert!(store.keys("/hold/").is_empty());
}
