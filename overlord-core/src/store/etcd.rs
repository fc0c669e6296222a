// Copyright 2026 Overlord Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! etcd-backed [`CoordinationStore`], grounded on the teacher's
//! `EtcdMetaStore` (`storage/etcd_meta_store.rs`): a thin key-encoding
//! wrapper around the etcd client, with retries for transient errors.
//!
//! Ephemeral nodes are modeled with an etcd lease kept alive by a
//! background task for as long as the created node should live;
//! dropping the returned lease keeper lets the lease (and therefore
//! the node) expire, mirroring ZooKeeper ephemeral-node semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use etcd_client::{Client, EventType, GetOptions, PutOptions, WatchOptions};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use thiserror_ext::AsReport;
use tracing::warn;

use super::{ChildrenEvent, CoordinationStore, NodeDataEvent};
use crate::error::Result;

const RETRY_BASE_MS: u64 = 50;
const RETRY_MAX_ATTEMPTS: usize = 5;

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE_MS)
        .map(jitter)
        .take(RETRY_MAX_ATTEMPTS)
}

pub struct EtcdCoordinationStore {
    client: Client,
    /// Ephemeral leases keyed by the path that owns them, so a later
    /// `delete` (or process exit) can let the lease be revoked.
    leases: Mutex<HashMap<String, i64>>,
    lease_ttl: Duration,
}

impl EtcdCoordinationStore {
    pub async fn connect(endpoints: Vec<String>, lease_ttl: Duration) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self {
            client,
            leases: Mutex::new(HashMap::new()),
            lease_ttl,
        })
    }

    async fn put_ephemeral(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut lease_client = self.client.lease_client();
        let grant = lease_client.grant(self.lease_ttl.as_secs() as i64, None).await?;
        let lease_id = grant.id();

        let (mut keeper, mut stream) = lease_client.keep_alive(lease_id).await?;
        tokio::spawn(async move {
            loop {
                if keeper.keep_alive().await.is_err() {
                    break;
                }
                match stream.message().await {
                    Ok(Some(_)) => {}
                    _ => break,
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        self.leases.lock().insert(path.to_string(), lease_id);

        let mut kv = self.client.kv_client();
        kv.put(path, data, Some(PutOptions::new().with_lease(lease_id)))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CoordinationStore for EtcdCoordinationStore {
    async fn create(&self, path: &str, ephemeral: bool, data: Vec<u8>) -> Result<()> {
        if ephemeral {
            return self.put_ephemeral(path, data).await;
        }
        let path = path.to_string();
        Retry::spawn(retry_strategy(), || {
            let mut kv = self.client.kv_client();
            let path = path.clone();
            let data = data.clone();
            async move {
                kv.put(path, data, None).await.map_err(|e| {
                    warn!(error = %e.as_report(), "transient error writing coordination node, retrying");
                    e
                })
            }
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.leases.lock().remove(path);
        let mut kv = self.client.kv_client();
        kv.delete(path, None).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(path, Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(resp.count() > 0)
    }

    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(path, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = format!("{}/", path);
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .filter_map(|kv| {
                let key = std::str::from_utf8(kv.key()).ok()?;
                let child = key.strip_prefix(&prefix)?;
                if child.is_empty() || child.contains('/') {
                    return None;
                }
                Some((child.to_string(), kv.value().to_vec()))
            })
            .collect())
    }

    fn watch_children(&self, path: &str) -> mpsc::UnboundedReceiver<ChildrenEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch_client = self.client.watch_client();
        let prefix = format!("{}/", path);
        tokio::spawn(async move {
            let (_watcher, mut stream) = match watch_client
                .watch(prefix.as_str(), Some(WatchOptions::new().with_prefix()))
                .await
            {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err.as_report(), path = %prefix, "failed to start children watch");
                    let _ = tx.send(ChildrenEvent::Resync);
                    return;
                }
            };
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            let _ = tx.send(ChildrenEvent::Resync);
                            return;
                        }
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(key) = std::str::from_utf8(kv.key()) else { continue };
                            let Some(child) = key.strip_prefix(&prefix) else { continue };
                            if child.is_empty() || child.contains('/') {
                                continue;
                            }
                            let sent = match event.event_type() {
                                EventType::Put => tx.send(ChildrenEvent::Added {
                                    child: child.to_string(),
                                    data: kv.value().to_vec(),
                                }),
                                EventType::Delete => tx.send(ChildrenEvent::Removed {
                                    child: child.to_string(),
                                }),
                            };
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(ChildrenEvent::Resync);
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err.as_report(), path = %prefix, "children watch stream failed, resyncing");
                        let _ = tx.send(ChildrenEvent::Resync);
                        return;
                    }
                }
            }
        });
        rx
    }

    fn watch_node_data(&self, path: &str) -> mpsc::UnboundedReceiver<NodeDataEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch_client = self.client.watch_client();
        let path = path.to_string();
        tokio::spawn(async move {
            let (_watcher, mut stream) = match watch_client.watch(path.as_str(), None).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err.as_report(), path = %path, "failed to start data watch");
                    let _ = tx.send(NodeDataEvent::Resync);
                    return;
                }
            };
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            let _ = tx.send(NodeDataEvent::Resync);
                            return;
                        }
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let sent = match event.event_type() {
                                EventType::Put => tx.send(NodeDataEvent::Updated {
                                    data: kv.value().to_vec(),
                                }),
                                EventType::Delete => tx.send(NodeDataEvent::Deleted),
                            };
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(NodeDataEvent::Resync);
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err.as_report(), path = %path, "data watch stream failed, resyncing");
                        let _ = tx.send(NodeDataEvent::Resync);
                        return;
                    }
                }
            }
        });
        rx
    }
}

pub type EtcdStoreRef = Arc<EtcdCoordinationStore>;
