// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! etcd v3 store client

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, PutOptions, Txn, TxnOp,
    WatchOptions,
};
use latch_core::{
    EventKind, KeyValue, LatchConfig, LeaseGrant, LeaseId, LeaseRenewal, RangeResponse, Revision,
    StoreClient, StoreError, WatchEvent, WatchStream,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// gRPC status codes that mean "try again"
const CODE_DEADLINE_EXCEEDED: i32 = 4;
const CODE_UNAVAILABLE: i32 = 14;

/// Store client backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    timeout: Duration,
}

impl EtcdStore {
    /// Connect to the configured endpoints
    pub async fn connect(config: &LatchConfig) -> Result<Self, StoreError> {
        let options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_timeout(config.dial_timeout)
            .with_keep_alive(Duration::from_secs(10), config.dial_timeout);
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(map_error)?;
        tracing::info!(endpoints = ?config.endpoints, "connected to etcd");
        Ok(Self {
            client,
            timeout: config.dial_timeout,
        })
    }

    fn client(&self) -> Client {
        // Clones share one channel
        self.client.clone()
    }
}

#[async_trait]
impl StoreClient for EtcdStore {
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let options = lease.map(|id| PutOptions::new().with_lease(id.0));
        let response = self
            .client()
            .put(key, value, options)
            .await
            .map_err(|e| match lease {
                Some(id) => map_lease_error(e, id),
                None => map_error(e),
            })?;
        Ok(response.header().map(|h| h.revision()).unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let response = self.client().get(key, None).await.map_err(map_error)?;
        response.kvs().first().map(convert_kv).transpose()
    }

    async fn range(&self, prefix: &str) -> Result<RangeResponse, StoreError> {
        let response = self
            .client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(map_error)?;
        let kvs = response
            .kvs()
            .iter()
            .map(convert_kv)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RangeResponse {
            kvs,
            revision: response.header().map(|h| h.revision()).unwrap_or_default(),
        })
    }

    async fn delete_if_revision(
        &self,
        key: &str,
        create_revision: Revision,
    ) -> Result<bool, StoreError> {
        let txn = Txn::new()
            .when([Compare::create_revision(
                key,
                CompareOp::Equal,
                create_revision,
            )])
            .and_then([TxnOp::delete(key, None)]);
        let response = self.client().txn(txn).await.map_err(map_error)?;
        Ok(response.succeeded())
    }

    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseGrant, StoreError> {
        let response = self
            .client()
            .lease_grant(ttl.as_secs() as i64, None)
            .await
            .map_err(map_error)?;
        Ok(LeaseGrant {
            id: LeaseId(response.id()),
            ttl: Duration::from_secs(response.ttl().max(0) as u64),
            revision: response.header().map(|h| h.revision()).unwrap_or_default(),
        })
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<LeaseRenewal, StoreError> {
        let mut client = self.client();
        let round_trip = async {
            let (mut keeper, mut stream) =
                client.lease_keep_alive(lease.0).await.map_err(|e| map_lease_error(e, lease))?;
            keeper.keep_alive().await.map_err(|e| map_lease_error(e, lease))?;
            match stream.message().await.map_err(|e| map_lease_error(e, lease))? {
                Some(response) => Ok(LeaseRenewal {
                    ttl: Duration::from_secs(response.ttl().max(0) as u64),
                    revision: response.header().map(|h| h.revision()).unwrap_or_default(),
                }),
                None => Err(StoreError::Unavailable(
                    "keep-alive stream closed".to_string(),
                )),
            }
        };
        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.client()
            .lease_revoke(lease.0)
            .await
            .map_err(|e| map_lease_error(e, lease))?;
        Ok(())
    }

    async fn watch(&self, key: &str, from_revision: Revision) -> Result<WatchStream, StoreError> {
        let options = (from_revision > 0)
            .then(|| WatchOptions::new().with_start_revision(from_revision));
        let (watcher, mut stream) = self
            .client()
            .watch(key, options)
            .await
            .map_err(map_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let key = key.to_string();
        tokio::spawn(async move {
            // Cancels the server-side watch once this task ends
            let _watcher = watcher;
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => return,
                    message = stream.message() => message,
                };
                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(map_error(e)));
                        return;
                    }
                };
                if response.compact_revision() > 0 {
                    let _ = tx.send(Err(StoreError::Compacted {
                        requested: from_revision,
                        compacted: response.compact_revision(),
                    }));
                    return;
                }
                if response.canceled() {
                    tracing::debug!(key = %key, reason = response.cancel_reason(), "watch cancelled");
                    return;
                }
                let revision = response.header().map(|h| h.revision()).unwrap_or_default();
                for event in response.events() {
                    let converted = match convert_event(event, revision) {
                        Ok(converted) => converted,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    };
                    if tx.send(Ok(converted)).is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

fn convert_kv(kv: &etcd_client::KeyValue) -> Result<KeyValue, StoreError> {
    let key = kv
        .key_str()
        .map_err(|e| StoreError::Other(format!("non-utf8 key: {e}")))?;
    Ok(KeyValue {
        key: key.to_string(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: (kv.lease() != 0).then_some(LeaseId(kv.lease())),
    })
}

fn convert_event(event: &etcd_client::Event, header: Revision) -> Result<WatchEvent, StoreError> {
    let Some(kv) = event.kv() else {
        return Err(StoreError::Other("watch event without key".to_string()));
    };
    let kv = convert_kv(kv)?;
    let kind = match event.event_type() {
        EventType::Put => EventKind::Put,
        EventType::Delete => EventKind::Delete,
    };
    // Deletes carry the deleting revision as mod_revision
    let revision = if kv.mod_revision > 0 {
        kv.mod_revision
    } else {
        header
    };
    Ok(WatchEvent { kind, kv, revision })
}

fn map_error(e: etcd_client::Error) -> StoreError {
    match e {
        etcd_client::Error::GRpcStatus(status) => {
            let message = status.message().to_string();
            match status.code() as i32 {
                CODE_UNAVAILABLE => StoreError::Unavailable(message),
                CODE_DEADLINE_EXCEEDED => {
                    StoreError::Unavailable(format!("deadline exceeded: {message}"))
                }
                _ => StoreError::Other(message),
            }
        }
        etcd_client::Error::TransportError(e) => StoreError::Unavailable(e.to_string()),
        etcd_client::Error::IoError(e) => StoreError::Unavailable(e.to_string()),
        etcd_client::Error::InvalidArgs(message) => StoreError::InvalidRequest(message),
        other => StoreError::Other(other.to_string()),
    }
}

/// Like `map_error`, recognizing etcd's unknown-lease rejection
fn map_lease_error(e: etcd_client::Error, lease: LeaseId) -> StoreError {
    match map_error(e) {
        StoreError::Other(message) if message.contains("lease not found") => {
            StoreError::LeaseNotFound(lease)
        }
        other => other,
    }
}
