// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration
//!
//! Loaded from TOML with human-readable durations:
//!
//! ```toml
//! endpoints = ["localhost:2379"]
//! dial_timeout = "5s"
//! lease_ttl = "60s"
//! prefix = "/my-lock/"
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff = "100ms"
//! ```

use crate::coordination::{SessionConfig, WatchConfig};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Store TTLs have whole-second granularity
const MIN_LEASE_TTL: Duration = Duration::from_secs(1);

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for store access, sessions and locks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchConfig {
    /// Store endpoints
    pub endpoints: Vec<String>,
    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// Session lease TTL
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    /// Keep-alive period; defaults to a third of the TTL
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub keep_alive_interval: Option<Duration>,
    /// Keep-alive attempts per renewal before the lease is declared lost
    pub max_renewal_attempts: u32,
    /// Existence poll period while a watch is unavailable
    #[serde(with = "humantime_serde")]
    pub watch_poll_interval: Duration,
    /// Lock key prefix
    pub prefix: String,
    /// Retry budget for transient store errors
    pub retry: RetryPolicy,
}

impl Default for LatchConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            dial_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(60),
            keep_alive_interval: None,
            max_renewal_attempts: 3,
            watch_poll_interval: Duration::from_secs(1),
            prefix: "/my-lock/".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LatchConfig {
    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".into()));
        }
        if self.lease_ttl < MIN_LEASE_TTL {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl must be at least {}",
                humantime::format_duration(MIN_LEASE_TTL)
            )));
        }
        if let Some(interval) = self.keep_alive_interval {
            if interval.is_zero() || interval >= self.lease_ttl / 2 {
                return Err(ConfigError::Invalid(
                    "keep_alive_interval must be positive and below half of lease_ttl".into(),
                ));
            }
        }
        if self.prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("prefix must name a key range".into()));
        }
        Ok(())
    }

    /// Session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        let renewal = self
            .retry
            .clone()
            .with_max_attempts(self.max_renewal_attempts);
        SessionConfig::new(self.lease_ttl)
            .with_keep_alive_interval(self.keep_alive_interval)
            .with_renewal(renewal)
    }

    /// Watch settings derived from this config
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new()
            .with_poll_interval(self.watch_poll_interval)
            .with_retry(self.retry.clone())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
