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

//! C6 — Task Lifecycle Coordinator.
//!
//! `Overlord` is the public entry point: it binds an externally
//! submitted task to a handle the caller can await, drives it through
//! PENDING -> ASSIGNED -> RUNNING -> COMPLETE (spec §4.6), and wires
//! together C1-C5 and C7. Modeled on the teacher's top-level
//! `GlobalBarrierManager`/`ClusterManager` split: one struct per
//! concern, composed and driven by a handful of long-lived background
//! loops owned by this top-level type.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use itertools::Itertools;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use thiserror_ext::AsReport;

use crate::assignment::{self, Assignment, AssignmentTimers, PendingTask, WorkerCandidate};
use crate::blacklist::BlacklistController;
use crate::clock::ClockRef;
use crate::config::OverlordConfig;
use crate::error::{OverlordError, Result};
use crate::metrics::OverlordMetrics;
use crate::model::{
    Task, TaskLocation, TaskStatus, TaskStatusCode, WorkItemSnapshot, WorkItemState, WorkerSlot,
};
use crate::registry::{RegistryEvent, WorkerRegistry};
use crate::report::ReportProxy;
use crate::status_cache::{StatusEvent, TaskStatusCache};
use crate::store::StoreRef;

/// In-memory record for a submitted task (spec §3). Exclusively owned
/// by [`Overlord`]; never constructed or mutated by C2/C3.
struct WorkItem {
    task: Task,
    state: WorkItemState,
    assigned_worker: Option<String>,
    assigned_at_millis: Option<i64>,
    location: Option<TaskLocation>,
    queue_insertion_time_millis: i64,
    result_tx: watch::Sender<Option<TaskStatus>>,
}

impl WorkItem {
    fn snapshot(&self) -> WorkItemSnapshot {
        WorkItemSnapshot {
            task_id: self.task.id.clone(),
            state: self.state,
            assigned_worker: self.assigned_worker.clone(),
            location: self.location.clone(),
            result: self.result_tx.borrow().clone(),
        }
    }

    fn resolve(&mut self, status: TaskStatus) {
        self.state = WorkItemState::Complete;
        let _ = self.result_tx.send(Some(status));
    }
}

/// A clone-able handle to a task's eventual outcome. Re-submitting the
/// same task id, or re-discovering it after a restart, yields another
/// handle that observes the same resolution (spec §8 idempotence).
#[derive(Clone)]
pub struct RunHandle {
    task_id: String,
    rx: watch::Receiver<Option<TaskStatus>>,
}

impl RunHandle {
    /// Waits for the task to reach COMPLETE and returns its final
    /// status. Safe to call from multiple clones concurrently.
    pub async fn result(mut self) -> TaskStatus {
        loop {
            if let Some(status) = self.rx.borrow().clone() {
                return status;
            }
            if self.rx.changed().await.is_err() {
                return TaskStatus {
                    id: self.task_id.clone(),
                    code: TaskStatusCode::Failed,
                    error_message: Some(OverlordError::worker_cleanup_cancel().to_string()),
                    location: None,
                };
            }
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

type ItemTable = RwLock<HashMap<String, Arc<AsyncMutex<WorkItem>>>>;

pub struct Overlord {
    config: OverlordConfig,
    store: StoreRef,
    clock: ClockRef,
    metrics: Arc<OverlordMetrics>,
    registry: Arc<WorkerRegistry>,
    status_cache: Arc<TaskStatusCache>,
    blacklist: Arc<BlacklistController>,
    timers: Arc<AssignmentTimers>,
    report: ReportProxy,
    items: ItemTable,
    loops: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Overlord {
    pub async fn start(
        config: OverlordConfig,
        store: StoreRef,
        clock: ClockRef,
        metrics: Arc<OverlordMetrics>,
    ) -> Result<Arc<Self>> {
        let (registry, registry_rx) = WorkerRegistry::start(
            store.clone(),
            config.announcements_path(),
            config.task_cleanup_timeout,
            clock.clone(),
        )
        .await?;
        let (status_cache, status_rx) =
            TaskStatusCache::new(store.clone(), format!("{}/status", config.store_root));
        let blacklist = Arc::new(BlacklistController::new(
            config.max_retries_before_blacklist,
            config.max_percentage_blacklist_workers,
            config.worker_blacklist_backoff.as_millis() as i64,
        ));
        let timers = AssignmentTimers::new(config.task_assignment_timeout);

        let overlord = Arc::new(Self {
            config,
            store,
            clock,
            metrics,
            registry,
            status_cache,
            blacklist,
            timers,
            report: ReportProxy::new(),
            items: RwLock::new(HashMap::new()),
            loops: AsyncMutex::new(Vec::new()),
        });

        overlord.rehydrate().await?;

        let dispatch = overlord.clone();
        let dispatch_handle = tokio::spawn(async move {
            dispatch.dispatch_loop(registry_rx, status_rx).await;
        });

        let assignment_loop_handle = {
            let overlord = overlord.clone();
            tokio::spawn(async move { overlord.assignment_loop().await })
        };
        let maintenance_loop_handle = {
            let overlord = overlord.clone();
            tokio::spawn(async move { overlord.maintenance_loop().await })
        };

        *overlord.loops.lock().await =
            vec![dispatch_handle, assignment_loop_handle, maintenance_loop_handle];

        Ok(overlord)
    }

    /// Cancels the background loops, unsubscribes caches, and resolves
    /// every outstanding promise with an error. Never deletes
    /// assignment nodes: the worker may still complete the task, and a
    /// future run recovers state from the store on startup (spec §5).
    pub async fn stop(&self) {
        for handle in self.loops.lock().await.drain(..) {
            handle.abort();
        }
        self.registry.shutdown();
        self.status_cache.shutdown_all();
        let items: Vec<_> = self.items.read().values().cloned().collect();
        for item_arc in items {
            let mut item = item_arc.lock().await;
            if item.state != WorkItemState::Complete {
                let id = item.task.id.clone();
                item.resolve(TaskStatus {
                    id,
                    code: TaskStatusCode::Failed,
                    error_message: Some(OverlordError::worker_cleanup_cancel().to_string()),
                    location: None,
                });
            }
        }
    }

    /// Submits a task. Re-submitting an id already tracked returns the
    /// existing handle rather than creating a second `WorkItem` (spec
    /// §8 "Submitting the same task id twice ... only one assignment
    /// node is ever written").
    ///
    /// The check-and-insert happens under a single hold of the table's
    /// write lock so two concurrent submits of the same id can never
    /// both observe "not present" and each build their own `WorkItem`:
    /// whichever loses the race gets back the winner's `Arc`, not a
    /// discarded one whose `result_tx` would never be driven.
    pub async fn submit(&self, task: Task) -> RunHandle {
        let item_arc = {
            let mut items = self.items.write();
            match items.entry(task.id.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.get().clone(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let (tx, _rx) = watch::channel(None);
                    let item = WorkItem {
                        queue_insertion_time_millis: self.clock.now_millis(),
                        task,
                        state: WorkItemState::Pending,
                        assigned_worker: None,
                        assigned_at_millis: None,
                        location: None,
                        result_tx: tx,
                    };
                    entry.insert(Arc::new(AsyncMutex::new(item))).clone()
                }
            }
        };

        let item = item_arc.lock().await;
        RunHandle {
            task_id: item.task.id.clone(),
            rx: item.result_tx.subscribe(),
        }
    }

    /// Re-discovers an in-flight (or already resolved) task by id
    /// without resubmitting its payload (spec §4.6 restart-time
    /// rehydration, §8 idempotence).
    pub async fn lookup(&self, task_id: &str) -> Option<RunHandle> {
        let item_arc = self.items.read().get(task_id).cloned()?;
        let item = item_arc.lock().await;
        Some(RunHandle {
            task_id: item.task.id.clone(),
            rx: item.result_tx.subscribe(),
        })
    }

    pub async fn snapshot(&self, task_id: &str) -> Option<WorkItemSnapshot> {
        let item_arc = self.items.read().get(task_id).cloned()?;
        Some(item_arc.lock().await.snapshot())
    }

    /// C7: opens a live report stream for a RUNNING task. Returns
    /// `None` if the task is unknown, PENDING, or already COMPLETE
    /// (spec §4.7).
    pub async fn stream_reports(
        &self,
        task_id: &str,
    ) -> Result<Option<impl futures::Stream<Item = reqwest::Result<bytes::Bytes>>>> {
        let Some(item_arc) = self.items.read().get(task_id).cloned() else {
            return Ok(None);
        };
        let item = item_arc.lock().await;
        if item.state != WorkItemState::Running {
            return Ok(None);
        }
        let Some(location) = item.location.clone() else {
            return Ok(None);
        };
        drop(item);
        Ok(Some(self.report.open_stream(&location, task_id).await?))
    }

    /// Operator-initiated decommission of a worker: deletes its
    /// assignment nodes and fails its tasks with the distinct
    /// "Canceled for worker cleanup" message (spec §4.2), as opposed to
    /// the organic-disappearance path which reports "disappeared".
    pub async fn evict_worker(&self, host: &str) -> Result<()> {
        self.fail_tasks_for_host(host, true).await
    }

    // ---- restart-time rehydration (spec §4.6) ----

    async fn rehydrate(&self) -> Result<()> {
        let now = self.clock.now_millis();
        for worker in self.registry.list_alive() {
            self.status_cache.watch_host(&worker.host).await;

            let assigned = self
                .store
                .list_children(&self.config.tasks_path(&worker.host))
                .await?;
            if assigned.is_empty() {
                continue;
            }
            let statuses: HashMap<String, TaskStatus> = self
                .store
                .list_children(&self.config.status_path(&worker.host))
                .await?
                .into_iter()
                .filter_map(|(id, data)| serde_json::from_slice(&data).ok().map(|s| (id, s)))
                .collect();

            for (task_id, payload) in assigned {
                let task: Task = match serde_json::from_slice(&payload) {
                    Ok(t) => t,
                    Err(err) => {
                        warn!(error = %err.as_report(), task_id, "dropping unparsable assignment node during rehydration");
                        continue;
                    }
                };
                let status = statuses.get(&task_id);
                let (state, location, initial_result) = match status {
                    None => (WorkItemState::Assigned, None, None),
                    Some(s) if s.code == TaskStatusCode::Running => {
                        (WorkItemState::Running, s.location.clone(), None)
                    }
                    Some(s) if s.is_terminal() => {
                        (WorkItemState::Complete, None, Some(s.clone()))
                    }
                    Some(_) => (WorkItemState::Assigned, None, None),
                };

                let (tx, _rx) = watch::channel(initial_result);
                let item = WorkItem {
                    task,
                    state,
                    assigned_worker: Some(worker.host.clone()),
                    assigned_at_millis: Some(now),
                    location,
                    queue_insertion_time_millis: now,
                    result_tx: tx,
                };
                if state == WorkItemState::Assigned {
                    self.timers.start(&task_id, now);
                }
                info!(task_id, host = %worker.host, ?state, "rehydrated work item from store");
                self.items
                    .write()
                    .insert(task_id, Arc::new(AsyncMutex::new(item)));
            }
        }
        Ok(())
    }

    // ---- event dispatch loop (C2/C3 -> C6, spec §9) ----

    async fn dispatch_loop(
        self: Arc<Self>,
        mut registry_rx: tokio::sync::mpsc::UnboundedReceiver<RegistryEvent>,
        mut status_rx: tokio::sync::mpsc::UnboundedReceiver<StatusEvent>,
    ) {
        loop {
            tokio::select! {
                event = registry_rx.recv() => {
                    match event {
                        Some(event) => self.handle_registry_event(event).await,
                        None => return,
                    }
                }
                event = status_rx.recv() => {
                    match event {
                        Some(event) => self.handle_status_event(event).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::WorkerJoined(worker) => {
                self.status_cache.watch_host(&worker.host).await;
            }
            RegistryEvent::WorkerLeft(worker) => {
                warn!(host = %worker.host, "worker left, cleanup timer armed");
            }
            RegistryEvent::CleanupFired(host) => {
                if let Err(err) = self.fail_tasks_for_host(&host, false).await {
                    warn!(error = %err.as_report(), host, "failed to clean up departed worker's tasks");
                }
                self.status_cache.unwatch_host(&host);
            }
            RegistryEvent::Resync => {
                info!("worker registry resynced after session loss");
            }
        }
    }

    async fn handle_status_event(&self, event: StatusEvent) {
        match event {
            StatusEvent::ChildAdded { status, .. } | StatusEvent::ChildUpdated { status, .. } => {
                self.apply_status(status).await;
            }
            StatusEvent::ChildRemoved { task_id, host } => {
                self.handle_status_removed(&task_id, &host).await;
            }
            StatusEvent::MalformedIgnored { host, task_id } => {
                warn!(host, task_id, "ignoring malformed task status node");
            }
            StatusEvent::Resync { host } => {
                self.status_cache.unwatch_host(&host);
                self.status_cache.watch_host(&host).await;
            }
        }
    }

    async fn apply_status(&self, status: TaskStatus) {
        let Some(item_arc) = self.items.read().get(&status.id).cloned() else {
            return;
        };
        let mut item = item_arc.lock().await;
        // State transitions are monotonic; a late event for an
        // already-COMPLETE item must be ignored (spec §5).
        if item.state == WorkItemState::Complete {
            return;
        }

        match status.code {
            TaskStatusCode::Running => {
                if item.state == WorkItemState::Assigned {
                    self.timers.cancel(&status.id);
                    item.state = WorkItemState::Running;
                }
                item.location = status.location.clone();
            }
            TaskStatusCode::Success => {
                self.timers.cancel(&status.id);
                let host = item.assigned_worker.clone();
                item.resolve(status.clone());
                drop(item);
                if let Some(host) = host {
                    self.blacklist.record_success(&host);
                }
                self.record_run_time(&status);
            }
            TaskStatusCode::Failed => {
                self.timers.cancel(&status.id);
                let host = item.assigned_worker.clone();
                item.resolve(status.clone());
                drop(item);
                if let Some(host) = host {
                    let alive = self.registry.list_alive().len();
                    self.blacklist
                        .record_failure(&host, alive, self.clock.now_millis());
                }
                self.record_run_time(&status);
            }
        }
    }

    async fn handle_status_removed(&self, task_id: &str, host: &str) {
        let Some(item_arc) = self.items.read().get(task_id).cloned() else {
            return;
        };
        let mut item = item_arc.lock().await;
        if item.state != WorkItemState::Complete {
            warn!(task_id, host, "status node removed before terminal status");
            self.timers.cancel(task_id);
            item.resolve(TaskStatus {
                id: task_id.to_string(),
                code: TaskStatusCode::Failed,
                error_message: Some(OverlordError::worker_disappeared().to_string()),
                location: None,
            });
        }
        drop(item);
        self.items.write().remove(task_id);
    }

    fn record_run_time(&self, status: &TaskStatus) {
        let Some(item_arc) = self.items.read().get(&status.id).cloned() else {
            return;
        };
        // best-effort: avoid blocking the dispatch loop on the item's
        // own lock, which it no longer needs once resolved.
        if let Ok(item) = item_arc.try_lock() {
            let elapsed_secs = (self.clock.now_millis() - item.queue_insertion_time_millis).max(0) as f64 / 1000.0;
            let status_label = match status.code {
                TaskStatusCode::Success => "success",
                TaskStatusCode::Failed => "failed",
                TaskStatusCode::Running => "running",
            };
            self.metrics
                .task_run_time
                .with_label_values(&[&item.task.id, &item.task.data_source, status_label])
                .observe(elapsed_secs);
        }
    }

    /// Fails every tracked task currently assigned to `host`. When
    /// `teardown` is set (operator-initiated eviction) the assignment
    /// node is deleted first and the error is `WorkerCleanupCancel`;
    /// otherwise (organic disappearance) the node is left for the
    /// worker to clean up if it ever comes back, and the error is
    /// `WorkerDisappeared` (spec §4.2).
    async fn fail_tasks_for_host(&self, host: &str, teardown: bool) -> Result<()> {
        let candidates: Vec<Arc<AsyncMutex<WorkItem>>> = self
            .items
            .read()
            .values()
            .filter(|item| {
                // cheap pre-filter without awaiting the lock; re-checked below.
                item.try_lock()
                    .map(|i| i.assigned_worker.as_deref() == Some(host) && i.state != WorkItemState::Complete)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for item_arc in candidates {
            let mut item = item_arc.lock().await;
            if item.assigned_worker.as_deref() != Some(host) || item.state == WorkItemState::Complete {
                continue;
            }
            let task_id = item.task.id.clone();
            self.timers.cancel(&task_id);
            if teardown {
                let path = format!("{}/{}", self.config.tasks_path(host), task_id);
                self.store.delete(&path).await?;
            }
            let error = if teardown {
                OverlordError::worker_cleanup_cancel()
            } else {
                OverlordError::worker_disappeared()
            };
            item.resolve(TaskStatus {
                id: task_id,
                code: TaskStatusCode::Failed,
                error_message: Some(error.to_string()),
                location: None,
            });
        }
        Ok(())
    }

    // ---- assignment loop (C4, spec §4.4, §5) ----

    async fn assignment_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            ticker.tick().await;
            self.run_assignment_pass().await;
        }
    }

    /// Exposed so tests can drive one assignment pass deterministically
    /// instead of waiting on the spawned loop's interval ticker.
    pub async fn run_assignment_once(&self) {
        self.run_assignment_pass().await;
    }

    async fn run_assignment_pass(&self) {
        let now = self.clock.now_millis();
        let alive = self.registry.list_alive();
        let alive_hosts: HashSet<&str> = alive.iter().map(|w| w.host.as_str()).collect();

        let (mut pending, occupied_groups, used_by_host) = {
            let items = self.items.read();
            let mut pending = Vec::new();
            let mut occupied = HashSet::new();
            let mut used: HashMap<String, u32> = HashMap::new();
            for item_arc in items.values() {
                let Ok(item) = item_arc.try_lock() else { continue };
                match item.state {
                    WorkItemState::Pending => pending.push(PendingTask {
                        task_id: item.task.id.clone(),
                        resource: item.task.resource.clone(),
                        queue_insertion_time_millis: item.queue_insertion_time_millis,
                    }),
                    WorkItemState::Assigned | WorkItemState::Running => {
                        if !item.task.resource.availability_group.is_empty() {
                            occupied.insert(item.task.resource.availability_group.clone());
                        }
                        if let Some(host) = &item.assigned_worker {
                            *used.entry(host.clone()).or_insert(0) += item.task.resource.required_capacity;
                        }
                    }
                    WorkItemState::Complete => {}
                }
            }
            (pending, occupied, used)
        };
        pending.sort_by_key(|p| p.queue_insertion_time_millis);

        let candidates: Vec<WorkerCandidate> = alive
            .iter()
            .map(|w| {
                let used = *used_by_host.get(&w.host).unwrap_or(&0);
                let idle = w.capacity.saturating_sub(used);
                let idle = if self.blacklist.is_blacklisted(&w.host, now) { 0 } else { idle };
                WorkerCandidate {
                    host: w.host.clone(),
                    category: w.category.clone(),
                    idle_capacity: idle,
                    disabled: w.is_disabled(),
                }
            })
            .collect();

        let assignments = assignment::select_assignments(&pending, &occupied_groups, &candidates);
        // Bounded by `pendingTasksRunnerNumThreads` (spec §6): several
        // independent tasks may publish concurrently within one pass
        // (spec §5), but only up to this many at once.
        let concurrency = self.config.pending_tasks_runner_num_threads.max(1);
        futures::stream::iter(
            assignments
                .into_iter()
                .filter(|a| alive_hosts.contains(a.host.as_str())),
        )
        .for_each_concurrent(concurrency, |a| self.publish_assignment(a, now))
        .await;

        self.refresh_gauges(now);
    }

    async fn publish_assignment(&self, assignment: Assignment, now: i64) {
        let Some(item_arc) = self.items.read().get(&assignment.task_id).cloned() else {
            return;
        };
        let mut item = item_arc.lock().await;
        // Serial-assignment safety (spec §4.4): aborts without
        // mutating worker state if the item moved on since selection.
        // Holding this lock across the store write makes the race this
        // guards against structurally unreachable within one process;
        // the check remains as defense in depth against future
        // refactors that might narrow the lock's scope.
        if item.state != WorkItemState::Pending || item.task.id != assignment.task_id {
            warn!(task_id = %assignment.task_id, "assignment raced, skipping this pass");
            return;
        }

        let path = format!("{}/{}", self.config.tasks_path(&assignment.host), assignment.task_id);
        let payload = match serde_json::to_vec(&item.task) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err.as_report(), task_id = %assignment.task_id, "failed to encode task payload");
                return;
            }
        };

        match self.store.create(&path, false, payload).await {
            Ok(()) => {
                item.state = WorkItemState::Assigned;
                item.assigned_worker = Some(assignment.host.clone());
                item.assigned_at_millis = Some(now);
                self.timers.start(&assignment.task_id, now);
                info!(task_id = %assignment.task_id, host = %assignment.host, "task assigned");
            }
            Err(err) => {
                warn!(error = %err.as_report(), task_id = %assignment.task_id, host = %assignment.host, "failed to publish assignment node, will retry next pass");
            }
        }
    }

    // ---- maintenance loop (spec §5: blacklist sweep + cleanup timers) ----

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_tick);
        loop {
            ticker.tick().await;
            self.run_maintenance_once().await;
        }
    }

    /// Exposed separately from the spawned loop so tests can drive the
    /// maintenance pass deterministically after advancing a
    /// [`crate::clock::ManualClock`], without waiting on real wall time
    /// (spec Design Note "Time").
    pub async fn run_maintenance_once(&self) {
        let now = self.clock.now_millis();
        self.blacklist.tick_maintenance(now);
        self.registry.tick_maintenance(now);

        for task_id in self.timers.tick_maintenance(now) {
            self.handle_assignment_timeout(&task_id, now).await;
        }
        self.refresh_gauges(now);
    }

    async fn handle_assignment_timeout(&self, task_id: &str, now: i64) {
        let Some(item_arc) = self.items.read().get(task_id).cloned() else {
            return;
        };
        let mut item = item_arc.lock().await;
        if item.state != WorkItemState::Assigned {
            return;
        }
        let host = item.assigned_worker.clone();
        item.resolve(TaskStatus {
            id: task_id.to_string(),
            code: TaskStatusCode::Failed,
            error_message: Some(OverlordError::assignment_timeout(task_id).to_string()),
            location: None,
        });
        drop(item);

        if let Some(host) = host {
            let path = format!("{}/{}", self.config.tasks_path(&host), task_id);
            if let Err(err) = self.store.delete(&path).await {
                warn!(error = %err.as_report(), task_id, host, "failed to delete expired assignment node");
            }
            let alive = self.registry.list_alive().len();
            self.blacklist.record_failure(&host, alive, now);
        }
    }

    fn used_capacity(&self, host: &str) -> u32 {
        self.items
            .read()
            .values()
            .filter_map(|item_arc| item_arc.try_lock().ok())
            .filter(|item| {
                matches!(item.state, WorkItemState::Assigned | WorkItemState::Running)
                    && item.assigned_worker.as_deref() == Some(host)
            })
            .map(|item| item.task.resource.required_capacity)
            .sum()
    }

    fn refresh_gauges(&self, now_millis: i64) {
        let alive = self.registry.list_alive();
        let by_category = alive.iter().into_group_map_by(|w| w.category.clone());

        for (category, workers) in &by_category {
            let total = workers.len() as i64;
            let mut idle = 0i64;
            let mut lazy = 0i64;
            let mut blacklisted = 0i64;
            for w in workers {
                let is_blacklisted = self.blacklist.is_blacklisted(&w.host, now_millis);
                // `WorkerSlot` is the per-worker capacity breakdown spec §3
                // requires (`used + idle == total`, idle/blacklisted
                // mutually exclusive); building one per worker here is what
                // actually backs the per-category gauges below instead of
                // re-deriving the same split ad hoc.
                let slot = WorkerSlot::new(w.capacity, self.used_capacity(&w.host), is_blacklisted);
                if is_blacklisted {
                    blacklisted += 1;
                } else if w.is_disabled() {
                    lazy += 1;
                } else if slot.idle > 0 {
                    idle += 1;
                }
            }
            self.metrics.workers_total_count.with_label_values(&[category]).set(total);
            self.metrics.workers_idle_count.with_label_values(&[category]).set(idle);
            self.metrics.workers_lazy_count.with_label_values(&[category]).set(lazy);
            self.metrics
                .workers_blacklisted_count
                .with_label_values(&[category])
                .set(blacklisted);
        }

        let mut pending_by_category: HashMap<String, i64> = HashMap::new();
        let mut running_by_category: HashMap<String, i64> = HashMap::new();
        for item_arc in self.items.read().values() {
            let Ok(item) = item_arc.try_lock() else { continue };
            let category = item.task.resource.category.clone().unwrap_or_default();
            match item.state {
                WorkItemState::Pending => *pending_by_category.entry(category).or_insert(0) += 1,
                WorkItemState::Running => *running_by_category.entry(category).or_insert(0) += 1,
                _ => {}
            }
        }
        for (category, count) in pending_by_category {
            self.metrics.task_pending_count.with_label_values(&[&category]).set(count);
        }
        for (category, count) in running_by_category {
            self.metrics.task_running_count.with_label_values(&[&category]).set(count);
        }
    }
}
