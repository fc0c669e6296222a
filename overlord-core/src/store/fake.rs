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

//! In-memory [`CoordinationStore`], used exclusively by this crate's
//! own test suite — the teacher keeps the analogous `MemoryStateStore`
//! (`storage/src/memory.rs`) alongside `EtcdMetaStore` for the same
//! reason.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChildrenEvent, CoordinationStore, NodeDataEvent};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Vec<u8>>,
    children_watchers: HashMap<String, Vec<mpsc::UnboundedSender<ChildrenEvent>>>,
    data_watchers: HashMap<String, Vec<mpsc::UnboundedSender<NodeDataEvent>>>,
}

/// A fake hierarchical store. Ephemeral nodes are tracked only so that
/// tests can simulate a worker's session dying via [`FakeCoordinationStore::expire_ephemeral`];
/// there is no real TTL.
#[derive(Default)]
pub struct FakeCoordinationStore {
    inner: Mutex<Inner>,
}

fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| {
        if parent.is_empty() {
            "/"
        } else {
            parent
        }
    })
}

fn child_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl FakeCoordinationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates the ephemeral node at `path` disappearing because its
    /// owning session died, without requiring an explicit `delete`
    /// from the (now-dead) worker.
    pub fn expire_ephemeral(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.nodes.remove(path);
        Self::notify_removed(&mut inner, path);
    }

    fn notify_added(inner: &mut Inner, path: &str, data: &[u8]) {
        if let Some(parent) = parent_of(path) {
            if let Some(watchers) = inner.children_watchers.get(parent) {
                let child = child_name(path).to_string();
                for tx in watchers {
                    let _ = tx.send(ChildrenEvent::Added {
                        child: child.clone(),
                        data: data.to_vec(),
                    });
                }
            }
        }
    }

    fn notify_updated(inner: &mut Inner, path: &str, data: &[u8]) {
        if let Some(watchers) = inner.data_watchers.get(path) {
            for tx in watchers {
                let _ = tx.send(NodeDataEvent::Updated {
                    data: data.to_vec(),
                });
            }
        }
    }

    fn notify_removed(inner: &mut Inner, path: &str) {
        if let Some(parent) = parent_of(path) {
            if let Some(watchers) = inner.children_watchers.get(parent) {
                let child = child_name(path).to_string();
                for tx in watchers {
                    let _ = tx.send(ChildrenEvent::Removed {
                        child: child.clone(),
                    });
                }
            }
        }
        if let Some(watchers) = inner.data_watchers.get(path) {
            for tx in watchers {
                let _ = tx.send(NodeDataEvent::Deleted);
            }
        }
    }
}

#[async_trait::async_trait]
impl CoordinationStore for FakeCoordinationStore {
    async fn create(&self, path: &str, _ephemeral: bool, data: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        let existed = inner.nodes.insert(path.to_string(), data.clone()).is_some();
        if existed {
            Self::notify_updated(&mut inner, path, &data);
        } else {
            Self::notify_added(&mut inner, path, &data);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.nodes.remove(path);
        Self::notify_removed(&mut inner, path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.inner.lock().nodes.contains_key(path))
    }

    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().nodes.get(path).cloned())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = format!("{}/", path);
        let inner = self.inner.lock();
        Ok(inner
            .nodes
            .iter()
            .filter_map(|(key, value)| {
                let child = key.strip_prefix(&prefix)?;
                if child.is_empty() || child.contains('/') {
                    return None;
                }
                Some((child.to_string(), value.clone()))
            })
            .collect())
    }

    fn watch_children(&self, path: &str) -> mpsc::UnboundedReceiver<ChildrenEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .children_watchers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn watch_node_data(&self, path: &str) -> mpsc::UnboundedReceiver<NodeDataEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .data_watchers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        rx
    }
}
