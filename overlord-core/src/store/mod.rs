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

//! C1 — Coordination Store Adapter.
//!
//! A thin typed facade over an external hierarchical, watchable
//! key-value service (spec §4.1, §6). Ephemeral nodes live under
//! `announcements`; assignment and status nodes are persistent.
//!
//! Per Design Note "Event-listener callbacks" (spec §9), watches never
//! hand back nested callbacks: each call spawns a task that pushes
//! typed events onto a single-consumer [`mpsc::UnboundedReceiver`],
//! so a slow consumer cannot block the store's own event pump.

pub mod etcd;
pub mod fake;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A child appeared or disappeared under a watched path.
#[derive(Debug, Clone)]
pub enum ChildrenEvent {
    Added { child: String, data: Vec<u8> },
    Removed { child: String },
    /// The store lost its session (or the watch stream otherwise had
    /// to be torn down) and children must be fully re-enumerated;
    /// spec §4.1 "a session-loss event propagates unconditionally".
    Resync,
}

/// A watched node's data changed.
#[derive(Debug, Clone)]
pub enum NodeDataEvent {
    Updated { data: Vec<u8> },
    Deleted,
    Resync,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn create(&self, path: &str, ephemeral: bool, data: Vec<u8>) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn list_children(&self, path: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Subscribe to children changes under `path`. Returns a receiver
    /// fed by a background task for as long as the returned handle (or
    /// the store itself) is alive.
    fn watch_children(&self, path: &str) -> mpsc::UnboundedReceiver<ChildrenEvent>;

    /// Subscribe to data changes of the single node at `path`.
    fn watch_node_data(&self, path: &str) -> mpsc::UnboundedReceiver<NodeDataEvent>;
}

pub type StoreRef = std::sync::Arc<dyn CoordinationStore>;
