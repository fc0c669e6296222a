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

//! C2 — Worker Registry.
//!
//! Tracks the currently alive worker set, detecting joins/departs via
//! the ephemeral announcement nodes under `announcements` (spec §4.2).
//! Keyed by host, the same way the teacher's `ClusterManagerCore` keys
//! its worker map by `WorkerKey(HostAddress)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};
use thiserror_ext::AsReport;

use crate::clock::ClockRef;
use crate::model::Worker;
use crate::store::{ChildrenEvent, StoreRef};

/// Events pushed to the dispatch loop (spec §9 "Event-listener
/// callbacks" — single-consumer queue, never a nested callback).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    WorkerJoined(Worker),
    WorkerLeft(Worker),
    /// The per-host cleanup timer scheduled on [`RegistryEvent::WorkerLeft`]
    /// fired without the worker reappearing; C6 must fail its tasks.
    CleanupFired(String),
    /// Session loss: the caller must treat the registry as fully
    /// re-enumerated (spec §4.1).
    Resync,
}

pub struct WorkerRegistry {
    store: StoreRef,
    announcements_path: String,
    cleanup_timeout: Duration,
    clock: ClockRef,
    workers: RwLock<HashMap<String, Worker>>,
    /// Deadline (millis) after which a departed host's tasks should be
    /// failed, unless the host reappears first (spec §4.2).
    cleanup_deadlines: RwLock<HashMap<String, i64>>,
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
    watch_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub async fn start(
        store: StoreRef,
        announcements_path: String,
        cleanup_timeout: Duration,
        clock: ClockRef,
    ) -> crate::error::Result<(Arc<Self>, mpsc::UnboundedReceiver<RegistryEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            store: store.clone(),
            announcements_path: announcements_path.clone(),
            cleanup_timeout,
            clock,
            workers: RwLock::new(HashMap::new()),
            cleanup_deadlines: RwLock::new(HashMap::new()),
            events_tx,
            watch_handle: parking_lot::Mutex::new(None),
        });

        registry.resync().await?;

        let registry_bg = registry.clone();
        let mut watch = store.watch_children(&announcements_path);
        let handle = tokio::spawn(async move {
            while let Some(event) = watch.recv().await {
                registry_bg.on_children_event(event).await;
            }
        });
        *registry.watch_handle.lock() = Some(handle);

        Ok((registry, events_rx))
    }

    /// Stops the background announcements watch. Called once from
    /// [`crate::coordinator::Overlord::stop`]; the worker map itself is
    /// left as-is since nothing reads it after shutdown.
    pub fn shutdown(&self) {
        if let Some(handle) = self.watch_handle.lock().take() {
            handle.abort();
        }
    }

    /// Full re-enumeration after startup or session loss (spec §4.1,
    /// §9 Open Question: never infer partial writes — just rehydrate
    /// from whatever is currently in the store).
    async fn resync(&self) -> crate::error::Result<()> {
        let children = self.store.list_children(&self.announcements_path).await?;
        let mut fresh = HashMap::with_capacity(children.len());
        for (host, data) in children {
            match serde_json::from_slice::<Worker>(&data) {
                Ok(worker) => {
                    fresh.insert(host, worker);
                }
                Err(err) => {
                    warn!(error = %err.as_report(), host, "dropping malformed worker announcement during resync");
                }
            }
        }
        *self.workers.write() = fresh;
        self.cleanup_deadlines.write().clear();
        let _ = self.events_tx.send(RegistryEvent::Resync);
        Ok(())
    }

    async fn on_children_event(&self, event: ChildrenEvent) {
        match event {
            ChildrenEvent::Added { child: host, data } => {
                let worker = match serde_json::from_slice::<Worker>(&data) {
                    Ok(w) => w,
                    Err(err) => {
                        warn!(error = %err.as_report(), host, "ignoring malformed worker announcement");
                        return;
                    }
                };
                let is_new = {
                    let mut workers = self.workers.write();
                    let is_new = !workers.contains_key(&host);
                    workers.insert(host.clone(), worker.clone());
                    is_new
                };
                self.cleanup_deadlines.write().remove(&host);
                if is_new {
                    info!(host = %worker.host, category = %worker.category, capacity = worker.capacity, "worker joined");
                    let _ = self.events_tx.send(RegistryEvent::WorkerJoined(worker));
                } else {
                    info!(host = %worker.host, disabled = worker.is_disabled(), "worker re-announced");
                }
            }
            ChildrenEvent::Removed { child: host } => {
                let removed = self.workers.write().remove(&host);
                if let Some(worker) = removed {
                    let deadline = self.clock.now_millis() + self.cleanup_timeout.as_millis() as i64;
                    self.cleanup_deadlines.write().insert(host.clone(), deadline);
                    warn!(host = %host, "worker departed, scheduling task cleanup");
                    let _ = self.events_tx.send(RegistryEvent::WorkerLeft(worker));
                }
            }
            ChildrenEvent::Resync => {
                if let Err(err) = self.resync().await {
                    warn!(error = %err.as_report(), "failed to resync worker registry");
                }
            }
        }
    }

    /// Invoked by the maintenance loop; fires [`RegistryEvent::CleanupFired`]
    /// for every host whose grace period has elapsed without the
    /// worker reappearing.
    pub fn tick_maintenance(&self, now_millis: i64) {
        let expired: Vec<String> = {
            let mut deadlines = self.cleanup_deadlines.write();
            let expired: Vec<String> = deadlines
                .iter()
                .filter(|(_, &deadline)| deadline <= now_millis)
                .map(|(host, _)| host.clone())
                .collect();
            for host in &expired {
                deadlines.remove(host);
            }
            expired
        };
        for host in expired {
            let _ = self.events_tx.send(RegistryEvent::CleanupFired(host));
        }
    }

    pub fn get(&self, host: &str) -> Option<Worker> {
        self.workers.read().get(host).cloned()
    }

    pub fn list_alive(&self) -> Vec<Worker> {
        self.workers.read().values().cloned().collect()
    }

    pub fn is_alive(&self, host: &str) -> bool {
        self.workers.read().contains_key(host)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::fake::FakeCoordinationStore;
    use crate::store::CoordinationStore;

    fn worker(host: &str) -> Worker {
        Worker {
            host: host.to_string(),
            ip: "10.0.0.1".to_string(),
            version: "1.0.0".to_string(),
            capacity: 2,
            category: "default".to_string(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resync_picks_up_preexisting_announcements() {
        let store = FakeCoordinationStore::new();
        store
            .create("/overlord/announcements/w1", true, serde_json::to_vec(&worker("w1")).unwrap())
            .await
            .unwrap();
        let clock = ManualClock::new(0);
        let (registry, _rx) = WorkerRegistry::start(
            store,
            "/overlord/announcements".to_string(),
            Duration::from_secs(15),
            clock,
        )
        .await
        .unwrap();
        assert!(registry.is_alive("w1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn departure_then_return_within_grace_cancels_cleanup() {
        let store = FakeCoordinationStore::new();
        let clock = ManualClock::new(0);
        let (registry, mut rx) = WorkerRegistry::start(
            store.clone(),
            "/overlord/announcements".to_string(),
            Duration::from_secs(15),
            clock.clone(),
        )
        .await
        .unwrap();

        store
            .create("/overlord/announcements/w1", true, serde_json::to_vec(&worker("w1")).unwrap())
            .await
            .unwrap();
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(RegistryEvent::WorkerJoined(_))));

        store.expire_ephemeral("/overlord/announcements/w1");
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(RegistryEvent::WorkerLeft(_))));
        assert!(!registry.is_alive("w1"));

        store
            .create("/overlord/announcements/w1", true, serde_json::to_vec(&worker("w1")).unwrap())
            .await
            .unwrap();
        settle().await;
        assert!(registry.is_alive("w1"));

        clock.advance(Duration::from_secs(20));
        registry.tick_maintenance(clock.now_millis());
        assert!(rx.try_recv().is_err(), "cleanup must not fire for a worker that came back");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_fires_after_grace_period_elapses() {
        let store = FakeCoordinationStore::new();
        let clock = ManualClock::new(0);
        let (registry, mut rx) = WorkerRegistry::start(
            store.clone(),
            "/overlord/announcements".to_string(),
            Duration::from_secs(15),
            clock.clone(),
        )
        .await
        .unwrap();
        store
            .create("/overlord/announcements/w1", true, serde_json::to_vec(&worker("w1")).unwrap())
            .await
            .unwrap();
        settle().await;
        let _ = rx.try_recv();

        store.expire_ephemeral("/overlord/announcements/w1");
        settle().await;
        let _ = rx.try_recv();

        clock.advance(Duration::from_secs(20));
        registry.tick_maintenance(clock.now_millis());
        match rx.try_recv() {
            Ok(RegistryEvent::CleanupFired(host)) => assert_eq!(host, "w1"),
            other => panic!("expected CleanupFired, got {other:?}"),
        }
    }
}
