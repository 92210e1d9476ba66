// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-session hand-off
//!
//! s1 takes the lock, s2 queues behind it, s1 releases and s2 acquires.

use anyhow::{bail, Context, Result};
use latch_core::{LatchConfig, Mutex, Session, StoreClient};
use std::time::Duration;

/// How often to check whether the second session has queued
const QUEUE_POLL: Duration = Duration::from_millis(10);

pub async fn run<S: StoreClient>(store: S, config: &LatchConfig) -> Result<()> {
    let session_config = config.session_config();
    let s1 = Session::open(store.clone(), &session_config)
        .await
        .context("failed to open session s1")?;
    let s2 = Session::open(store.clone(), &session_config)
        .await
        .context("failed to open session s2")?;

    let mut m1 = mutex(&s1, config);
    let mut m2 = mutex(&s2, config);

    m1.lock().await.context("s1 failed to lock")?;
    println!("acquired lock for s1");

    let waiter = tokio::spawn(async move {
        let token = m2.lock().await;
        (m2, token)
    });
    wait_for_waiters(&store, m1.prefix(), 2, config.dial_timeout).await?;

    m1.unlock().await.context("s1 failed to unlock")?;
    println!("released lock for s1");

    let (mut m2, token) = waiter.await.context("s2 lock task failed")?;
    let token = token.context("s2 failed to lock")?;
    println!("acquired lock for s2");
    tracing::debug!(%token, "s2 fencing token");

    m2.unlock().await.context("s2 failed to unlock")?;
    s1.close().await?;
    s2.close().await?;
    Ok(())
}

fn mutex<S: StoreClient>(session: &Session<S>, config: &LatchConfig) -> Mutex<S> {
    Mutex::new(session.clone(), &config.prefix)
        .with_watch_config(config.watch_config())
        .with_retry(config.retry.clone())
}

/// Wait until `count` contenders have written keys under `prefix`
async fn wait_for_waiters<S: StoreClient>(
    store: &S,
    prefix: &str,
    count: usize,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let range = store.range(prefix).await?;
        if range.kvs.len() >= count {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("second session did not queue within {}", humantime::format_duration(timeout));
        }
        tokio::time::sleep(QUEUE_POLL).await;
    }
}
