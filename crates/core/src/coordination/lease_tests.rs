// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::{MemoryStore, StoreCall};
use yare::parameterized;

const TTL: Duration = Duration::from_secs(30);

fn keep_alive() -> KeepAlive {
    KeepAlive::for_ttl(TTL, None, RetryPolicy::default())
}

fn keep_alive_count(store: &MemoryStore) -> usize {
    store
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::LeaseKeepAlive { .. }))
        .count()
}

#[parameterized(
    default_is_a_third = { 30, None, 10_000 },
    requested_below_half = { 30, Some(5_000), 5_000 },
    requested_at_half = { 30, Some(15_000), 10_000 },
    requested_zero = { 30, Some(0), 10_000 },
    short_ttl = { 1, None, 333 },
)]
fn keep_alive_interval_stays_below_half_ttl(ttl_secs: u64, requested_ms: Option<u64>, expected_ms: u64) {
    let ttl = Duration::from_secs(ttl_secs);
    let keep_alive = KeepAlive::for_ttl(
        ttl,
        requested_ms.map(Duration::from_millis),
        RetryPolicy::default(),
    );
    assert_eq!(keep_alive.interval.as_millis() as u64, expected_ms);
    assert!(keep_alive.interval < ttl / 2);
}

#[tokio::test(start_paused = true)]
async fn grant_starts_alive() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();

    assert!(manager.is_alive());
    assert_eq!(manager.ttl(), TTL);
    assert_eq!(store.lease_ids(), vec![manager.id()]);
    assert_eq!(manager.lease().id, manager.id());
}

#[tokio::test(start_paused = true)]
async fn keep_alive_renews_on_interval() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;

    assert!(manager.is_alive());
    assert!(keep_alive_count(&store) >= 3);
}

#[tokio::test(start_paused = true)]
async fn lease_removed_by_store_is_expired() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();

    store.lease_revoke(manager.id()).await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(60), manager.lost())
        .await
        .unwrap();
    assert_eq!(reason, LossReason::Expired);
    assert!(!manager.is_alive());
}

#[tokio::test(start_paused = true)]
async fn failing_renewals_exhaust_budget() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();

    store.reject_keep_alives(true);

    let reason = tokio::time::timeout(Duration::from_secs(60), manager.lost())
        .await
        .unwrap();
    assert!(
        matches!(reason, LossReason::KeepAliveFailed { attempts: 3, .. }),
        "unexpected reason: {reason:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn transient_renewal_failure_recovers() {
    let store = MemoryStore::new();
    let renewal = RetryPolicy::default()
        .with_max_attempts(5)
        .with_initial_backoff(Duration::from_secs(1));
    let manager = LeaseManager::grant(store.clone(), TTL, KeepAlive::for_ttl(TTL, None, renewal))
        .await
        .unwrap();

    store.reject_keep_alives(true);
    // First renewal at 10s fails, the retry lands at 11s
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    store.reject_keep_alives(false);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(manager.is_alive());
}

#[tokio::test(start_paused = true)]
async fn revoke_deletes_keys_and_reports_revoked() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();
    store.put("/held", b"", Some(manager.id())).await.unwrap();

    manager.revoke().await.unwrap();

    assert_eq!(manager.lost().await, LossReason::Revoked);
    assert!(store.keys("/held").is_empty());
    assert!(store.lease_ids().is_empty());
    // Second revoke finds nothing and still succeeds
    manager.revoke().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn revoke_stops_keep_alive() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();
    manager.revoke().await.unwrap();
    store.clear_calls();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(keep_alive_count(&store), 0);
}

#[tokio::test(start_paused = true)]
async fn loss_is_seen_by_every_observer() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();
    store.lease_revoke(manager.id()).await.unwrap();

    let (a, b) = tokio::join!(manager.lost(), manager.lost());
    assert_eq!(a, LossReason::Expired);
    assert_eq!(b, LossReason::Expired);
    // Later observers resolve immediately with the same reason
    assert_eq!(manager.lost().await, LossReason::Expired);
}

#[tokio::test(start_paused = true)]
async fn loss_reason_is_not_overwritten_by_revoke() {
    let store = MemoryStore::new();
    let manager = LeaseManager::grant(store.clone(), TTL, keep_alive()).await.unwrap();
    store.lease_revoke(manager.id()).await.unwrap();
    manager.lost().await;

    manager.revoke().await.unwrap();
    assert_eq!(manager.status().loss_reason(), Some(LossReason::Expired));
}

#[tokio::test(start_paused = true)]
async fn adopt_existing_lease() {
    let store = MemoryStore::new();
    let grant = store.lease_grant(TTL).await.unwrap();

    let manager = LeaseManager::adopt(store.clone(), grant.id, keep_alive())
        .await
        .unwrap();
    assert!(manager.is_alive());
    assert_eq!(manager.id(), grant.id);
}

#[tokio::test(start_paused = true)]
async fn adopt_unknown_lease_fails() {
    let store = MemoryStore::new();
    let result = LeaseManager::adopt(store, LeaseId(99), keep_alive()).await;
    assert!(matches!(result, Err(StoreError::LeaseNotFound(LeaseId(99)))));
}

#[tokio::test(start_paused = true)]
async fn grant_surfaces_unavailable_store() {
    let store = MemoryStore::new();
    store.set_unavailable(true);
    let result = LeaseManager::grant(store, TTL, keep_alive()).await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

#[test]
fn loss_reason_display() {
    let reason = LossReason::KeepAliveFailed {
        attempts: 3,
        error: "store unavailable: down".to_string(),
    };
    assert_eq!(
        reason.to_string(),
        "keep-alive failed after 3 attempts: store unavailable: down"
    );
    assert_eq!(LossReason::Expired.to_string(), "expired");
}
