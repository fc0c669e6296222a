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

//! C3 — Task Status Cache.
//!
//! Maintains a per-worker child cache on `/status/<host>` (spec
//! §4.3), demultiplexing the raw children events from [`crate::store`]
//! into the `ChildAdded`/`ChildUpdated`/`ChildRemoved` semantics of a
//! path-children cache: unlike a raw key-value watch, a cache
//! distinguishes a child's *first* appearance from a later update to
//! the same child, by tracking which task ids it has already seen per
//! worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use thiserror_ext::AsReport;
use tracing::warn;

use crate::model::TaskStatus;
use crate::store::{ChildrenEvent, StoreRef};

#[derive(Debug, Clone)]
pub enum StatusEvent {
    ChildAdded { host: String, status: TaskStatus },
    ChildUpdated { host: String, status: TaskStatus },
    ChildRemoved { host: String, task_id: String },
    /// Malformed payload: per spec §4.3/§7 this must alert, not throw,
    /// and is otherwise ignored.
    MalformedIgnored { host: String, task_id: String },
    Resync { host: String },
}

struct HostWatch {
    handle: JoinHandle<()>,
    seen: Arc<Mutex<HashSet<String>>>,
}

pub struct TaskStatusCache {
    store: StoreRef,
    status_root: String,
    events_tx: mpsc::UnboundedSender<StatusEvent>,
    watches: Mutex<HashMap<String, HostWatch>>,
}

impl TaskStatusCache {
    pub fn new(store: StoreRef, status_root: String) -> (Arc<Self>, mpsc::UnboundedReceiver<StatusEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                store,
                status_root,
                events_tx,
                watches: Mutex::new(HashMap::new()),
            }),
            events_rx,
        )
    }

    fn host_path(&self, host: &str) -> String {
        format!("{}/{}", self.status_root, host)
    }

    /// Start caching `/status/<host>`, seeded with whatever status
    /// nodes already exist (used both on a fresh worker join and
    /// during restart-time rehydration, spec §4.6).
    pub async fn watch_host(&self, host: &str) {
        if self.watches.lock().contains_key(host) {
            return;
        }
        let path = self.host_path(host);
        let existing = self.store.list_children(&path).await.unwrap_or_else(|err| {
            warn!(error = %err.as_report(), host, "failed to list existing status nodes");
            Vec::new()
        });

        let seen = Arc::new(Mutex::new(HashSet::new()));
        for (task_id, data) in &existing {
            seen.lock().insert(task_id.clone());
            self.emit_initial(host, task_id, data);
        }

        let mut watch = self.store.watch_children(&path);
        let tx = self.events_tx.clone();
        let host_owned = host.to_string();
        let seen_task = seen.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = watch.recv().await {
                match event {
                    ChildrenEvent::Added { child: task_id, data } => {
                        if data.is_empty() {
                            warn!(host = %host_owned, task_id, "status node data is null, ignoring");
                            let _ = tx.send(StatusEvent::MalformedIgnored {
                                host: host_owned.clone(),
                                task_id,
                            });
                            continue;
                        }
                        let is_new = seen_task.lock().insert(task_id.clone());
                        match serde_json::from_slice::<TaskStatus>(&data) {
                            Ok(status) => {
                                let event = if is_new {
                                    StatusEvent::ChildAdded {
                                        host: host_owned.clone(),
                                        status,
                                    }
                                } else {
                                    StatusEvent::ChildUpdated {
                                        host: host_owned.clone(),
                                        status,
                                    }
                                };
                                let _ = tx.send(event);
                            }
                            Err(err) => {
                                warn!(error = %err.as_report(), host = %host_owned, task_id, "malformed task status, ignoring");
                                let _ = tx.send(StatusEvent::MalformedIgnored {
                                    host: host_owned.clone(),
                                    task_id,
                                });
                            }
                        }
                    }
                    ChildrenEvent::Removed { child: task_id } => {
                        seen_task.lock().remove(&task_id);
                        let _ = tx.send(StatusEvent::ChildRemoved {
                            host: host_owned.clone(),
                            task_id,
                        });
                    }
                    ChildrenEvent::Resync => {
                        let _ = tx.send(StatusEvent::Resync {
                            host: host_owned.clone(),
                        });
                    }
                }
            }
        });

        self.watches.lock().insert(host.to_string(), HostWatch { handle, seen });
    }

    fn emit_initial(&self, host: &str, task_id: &str, data: &[u8]) {
        if data.is_empty() {
            let _ = self.events_tx.send(StatusEvent::MalformedIgnored {
                host: host.to_string(),
                task_id: task_id.to_string(),
            });
            return;
        }
        match serde_json::from_slice::<TaskStatus>(data) {
            Ok(status) => {
                let _ = self.events_tx.send(StatusEvent::ChildAdded {
                    host: host.to_string(),
                    status,
                });
            }
            Err(err) => {
                warn!(error = %err.as_report(), host, task_id, "malformed task status during rehydration");
                let _ = self.events_tx.send(StatusEvent::MalformedIgnored {
                    host: host.to_string(),
                    task_id: task_id.to_string(),
                });
            }
        }
    }

    pub fn unwatch_host(&self, host: &str) {
        if let Some(watch) = self.watches.lock().remove(host) {
            watch.handle.abort();
        }
    }

    /// Stops every per-host watch task. Called once from
    /// [`crate::coordinator::Overlord::stop`].
    pub fn shutdown_all(&self) {
        for (_, watch) in self.watches.lock().drain() {
            watch.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatusCode;
    use crate::store::fake::FakeCoordinationStore;
    use crate::store::CoordinationStore;

    fn status(id: &str, code: TaskStatusCode) -> TaskStatus {
        TaskStatus {
            id: id.to_string(),
            code,
            error_message: None,
            location: None,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinguishes_first_appearance_from_later_update() {
        let store = FakeCoordinationStore::new();
        let (cache, mut rx) = TaskStatusCache::new(store.clone(), "/overlord/status".to_string());
        cache.watch_host("w1").await;

        store
            .create(
                "/overlord/status/w1/task1",
                false,
                serde_json::to_vec(&status("task1", TaskStatusCode::Running)).unwrap(),
            )
            .await
            .unwrap();
        settle().await;
        match rx.try_recv() {
            Ok(StatusEvent::ChildAdded { status, .. }) => assert_eq!(status.code, TaskStatusCode::Running),
            other => panic!("expected ChildAdded, got {other:?}"),
        }

        store
            .create(
                "/overlord/status/w1/task1",
                false,
                serde_json::to_vec(&status("task1", TaskStatusCode::Success)).unwrap(),
            )
            .await
            .unwrap();
        settle().await;
        match rx.try_recv() {
            Ok(StatusEvent::ChildUpdated { status, .. }) => assert_eq!(status.code, TaskStatusCode::Success),
            other => panic!("expected ChildUpdated, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_payload_is_reported_and_ignored() {
        let store = FakeCoordinationStore::new();
        let (cache, mut rx) = TaskStatusCache::new(store.clone(), "/overlord/status".to_string());
        cache.watch_host("w1").await;

        store
            .create("/overlord/status/w1/bad", false, b"not json".to_vec())
            .await
            .unwrap();
        settle().await;
        match rx.try_recv() {
            Ok(StatusEvent::MalformedIgnored { task_id, .. }) => assert_eq!(task_id, "bad"),
            other => panic!("expected MalformedIgnored, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watch_host_seeds_from_preexisting_children() {
        let store = FakeCoordinationStore::new();
        store
            .create(
                "/overlord/status/w1/task1",
                false,
                serde_json::to_vec(&status("task1", TaskStatusCode::Running)).unwrap(),
            )
            .await
            .unwrap();
        let (cache, mut rx) = TaskStatusCache::new(store, "/overlord/status".to_string());
        cache.watch_host("w1").await;
        match rx.try_recv() {
            Ok(StatusEvent::ChildAdded { host, status }) => {
                assert_eq!(host, "w1");
                assert_eq!(status.id, "task1");
            }
            other => panic!("expected seeded ChildAdded, got {other:?}"),
        }
    }
}
