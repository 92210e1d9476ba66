// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hold the lock for a while

use anyhow::{Context, Result};
use clap::Args;
use latch_core::{LatchConfig, LockError, Mutex, Session, StoreClient};
use std::time::Duration;

#[derive(Args)]
pub struct HoldArgs {
    /// How long to hold the lock once acquired
    #[arg(long = "for", default_value = "5s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Give up if the lock is not acquired within this time
    #[arg(long, value_parser = humantime::parse_duration)]
    pub wait: Option<Duration>,
}

/// How a `hold` ended
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The wait limit passed, or Ctrl-C arrived, before the lock was free
    GaveUp,
    /// The lock was acquired, held and released
    Released,
}

pub async fn run<S: StoreClient>(store: S, config: &LatchConfig, args: HoldArgs) -> Result<()> {
    let session = Session::open(store, &config.session_config())
        .await
        .context("failed to open session")?;
    let mut mutex = Mutex::new(session.clone(), &config.prefix)
        .with_watch_config(config.watch_config())
        .with_retry(config.retry.clone());

    let result = hold(&mut mutex, &session, &args).await;
    session.close().await?;
    result.map(|_| ())
}

pub(crate) async fn hold<S: StoreClient>(
    mutex: &mut Mutex<S>,
    session: &Session<S>,
    args: &HoldArgs,
) -> Result<Outcome> {
    let wait = args.wait;
    let cancel = async move {
        match wait {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {}
                    _ = interrupted() => {}
                }
            }
            None => interrupted().await,
        }
    };

    let token = match mutex.lock_until(cancel).await {
        Ok(token) => token,
        Err(LockError::Cancelled) => {
            println!("gave up waiting for {}", mutex.prefix());
            return Ok(Outcome::GaveUp);
        }
        Err(e) => return Err(e).context("failed to acquire lock"),
    };
    let key = mutex.key().unwrap_or_default().to_string();
    println!("acquired {key} (fencing token {token})");

    tokio::select! {
        _ = tokio::time::sleep(args.duration) => {}
        _ = interrupted() => {
            tracing::info!("interrupted, releasing early");
        }
        reason = session.lost() => {
            tracing::error!(%reason, "lease lost while holding the lock");
        }
    }

    mutex.unlock().await.context("failed to release lock")?;
    println!("released {key}");
    Ok(Outcome::Released)
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "hold_tests.rs"]
mod tests;
