// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! latch - fair distributed mutex CLI

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::{demo, hold};
use latch_adapters::TracedStore;
use latch_core::{LatchConfig, MemoryStore, StoreClient};
use std::path::PathBuf;
use std::time::Duration;

/// How often the in-process store expires leases
const REAP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "latch",
    version,
    about = "Fair, lease-bounded distributed mutex"
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "LATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Store endpoints, comma separated
    #[arg(long, global = true, env = "LATCH_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Connection timeout, e.g. "5s"
    #[arg(long, global = true, env = "LATCH_DIAL_TIMEOUT", value_parser = humantime::parse_duration)]
    dial_timeout: Option<Duration>,

    /// Session lease TTL, e.g. "60s"
    #[arg(long, global = true, env = "LATCH_LEASE_TTL", value_parser = humantime::parse_duration)]
    lease_ttl: Option<Duration>,

    /// Lock key prefix
    #[arg(long, global = true, env = "LATCH_PREFIX")]
    prefix: Option<String>,

    /// Store backend
    #[arg(long, global = true, env = "LATCH_STORE", value_enum, default_value_t = StoreKind::Memory)]
    store: StoreKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// In-process store; state lives only as long as the command
    Memory,
    /// etcd v3 cluster at the configured endpoints
    Etcd,
}

#[derive(Subcommand)]
enum Commands {
    /// Two sessions contend for one lock and hand it over
    Demo,
    /// Acquire the lock, hold it, then release it
    Hold(hold::HoldArgs),
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let config = resolve_config(&cli)?;

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string(&config)?);
        return Ok(());
    }

    match cli.store {
        StoreKind::Memory => {
            let memory = MemoryStore::new();
            let reaper = memory.spawn_reaper(REAP_INTERVAL);
            let result = run(TracedStore::new(memory), &config, cli.command).await;
            reaper.abort();
            result
        }
        #[cfg(feature = "etcd")]
        StoreKind::Etcd => {
            let store = latch_adapters::EtcdStore::connect(&config)
                .await
                .context("failed to connect to etcd")?;
            run(TracedStore::new(store), &config, cli.command).await
        }
        #[cfg(not(feature = "etcd"))]
        StoreKind::Etcd => {
            anyhow::bail!("latch was built without etcd support; rebuild with --features etcd")
        }
    }
}

async fn run<S: StoreClient>(store: S, config: &LatchConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Demo => demo::run(store, config).await,
        Commands::Hold(args) => hold::run(store, config, args).await,
        Commands::Config => Ok(()),
    }
}

/// File (or defaults), then flags and `LATCH_*` variables on top
fn resolve_config(cli: &Cli) -> Result<LatchConfig> {
    let mut config = match &cli.config {
        Some(path) => LatchConfig::load(path)?,
        None => LatchConfig::default(),
    };

    if !cli.endpoints.is_empty() {
        config.endpoints = cli.endpoints.clone();
    }
    if let Some(timeout) = cli.dial_timeout {
        config.dial_timeout = timeout;
    }
    if let Some(ttl) = cli.lease_ttl {
        config.lease_ttl = ttl;
    }
    if let Some(prefix) = &cli.prefix {
        config.prefix = prefix.clone();
    }

    config.validate().context("invalid settings")?;
    Ok(config)
}

/// Logs go to stderr; stdout carries command output only
fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
