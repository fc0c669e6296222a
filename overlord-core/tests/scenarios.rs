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

//! End-to-end scenarios driving a full [`Overlord`] against
//! [`FakeCoordinationStore`] and [`ManualClock`], matching the literal
//! scenarios used while designing the assignment/blacklist/timeout
//! behavior: deterministic, no real sleeps, time advanced explicitly.

use std::sync::Arc;
use std::time::Duration;

use overlord_core::clock::ManualClock;
use overlord_core::config::OverlordConfig;
use overlord_core::metrics::{new_registry, OverlordMetrics};
use overlord_core::model::{
    ResourceRequest, Task, TaskLocation, TaskStatus, TaskStatusCode, Worker, WorkItemState,
};
use overlord_core::store::fake::FakeCoordinationStore;
use overlord_core::store::CoordinationStore;
use overlord_core::Overlord;

fn worker(host: &str, capacity: u32) -> Worker {
    Worker {
        host: host.to_string(),
        ip: "10.0.0.1".to_string(),
        version: "1.0.0".to_string(),
        capacity,
        category: "default".to_string(),
    }
}

fn task(id: &str, group: &str, required: u32) -> Task {
    Task {
        id: id.to_string(),
        resource: ResourceRequest {
            availability_group: group.to_string(),
            required_capacity: required,
            category: None,
        },
        payload: serde_json::json!({}),
        data_source: "test".to_string(),
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn start_overlord(
    config: OverlordConfig,
    store: Arc<FakeCoordinationStore>,
    clock: Arc<ManualClock>,
) -> Arc<Overlord> {
    let registry = new_registry();
    let metrics = Arc::new(OverlordMetrics::new(&registry));
    Overlord::start(config, store, clock, metrics).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_assigns_runs_and_succeeds() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 3)).unwrap(),
        )
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;

    let handle = overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;

    let snapshot = overlord.snapshot("task1").await.unwrap();
    assert_eq!(snapshot.state, WorkItemState::Assigned);
    assert_eq!(snapshot.assigned_worker.as_deref(), Some("w1"));

    let status_path = format!("{}/task1", config.status_path("w1"));
    store
        .create(
            &status_path,
            false,
            serde_json::to_vec(&TaskStatus {
                id: "task1".to_string(),
                code: TaskStatusCode::Running,
                error_message: None,
                location: Some(TaskLocation { host: "w1".to_string(), port: 9000, tls: false }),
            })
            .unwrap(),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Running);

    store
        .create(
            &status_path,
            false,
            serde_json::to_vec(&TaskStatus {
                id: "task1".to_string(),
                code: TaskStatusCode::Success,
                error_message: None,
                location: None,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    settle().await;

    let result = handle.result().await;
    assert_eq!(result.code, TaskStatusCode::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn availability_group_excludes_second_task_in_same_group() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    for host in ["w1", "w2", "w3"] {
        store
            .create(
                &format!("{}/{}", config.announcements_path(), host),
                true,
                serde_json::to_vec(&worker(host, 1)).unwrap(),
            )
            .await
            .unwrap();
    }

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;

    overlord.submit(task("rt1", "g1", 1)).await;
    overlord.submit(task("rt2", "g1", 1)).await;
    overlord.submit(task("rt3", "g2", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;

    assert_eq!(overlord.snapshot("rt1").await.unwrap().state, WorkItemState::Assigned);
    assert_eq!(overlord.snapshot("rt3").await.unwrap().state, WorkItemState::Assigned);
    assert_eq!(overlord.snapshot("rt2").await.unwrap().state, WorkItemState::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_disappearance_fails_in_flight_task() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let mut config = OverlordConfig::default();
    config.task_cleanup_timeout = Duration::from_millis(50);

    let announce_path = format!("{}/w1", config.announcements_path());
    store
        .create(&announce_path, true, serde_json::to_vec(&worker("w1", 2)).unwrap())
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    let handle = overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;
    assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Assigned);

    store.expire_ephemeral(&announce_path);
    settle().await;

    clock.advance(Duration::from_millis(60));
    overlord.run_maintenance_once().await;
    settle().await;

    let result = handle.result().await;
    assert_eq!(result.code, TaskStatusCode::Failed);
    assert!(result.error_message.unwrap().contains("disappeared"));
}

#[tokio::test(flavor = "multi_thread")]
async fn assignment_timeout_fails_task_and_frees_capacity() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let mut config = OverlordConfig::default();
    config.task_assignment_timeout = Duration::from_millis(100);

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 1)).unwrap(),
        )
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    let handle = overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;
    assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Assigned);

    clock.advance(Duration::from_millis(150));
    overlord.run_maintenance_once().await;
    settle().await;

    let result = handle.result().await;
    assert_eq!(result.code, TaskStatusCode::Failed);
    assert!(result
        .error_message
        .unwrap()
        .starts_with("The worker that this task is assigned did not start it in timeout"));
}

#[tokio::test(flavor = "multi_thread")]
async fn blacklist_at_full_cap_recovers_after_backoff() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let mut config = OverlordConfig::default();
    config.max_retries_before_blacklist = 2;
    config.max_percentage_blacklist_workers = 100;
    config.worker_blacklist_backoff = Duration::from_millis(100);

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 1)).unwrap(),
        )
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;

    for id in ["fail1", "fail2"] {
        let handle = overlord.submit(task(id, "", 1)).await;
        overlord.run_assignment_once().await;
        settle().await;
        let status_path = format!("{}/{}", config.status_path("w1"), id);
        store
            .create(
                &status_path,
                false,
                serde_json::to_vec(&TaskStatus {
                    id: id.to_string(),
                    code: TaskStatusCode::Failed,
                    error_message: Some("boom".to_string()),
                    location: None,
                })
                .unwrap(),
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(handle.result().await.code, TaskStatusCode::Failed);
    }

    let handle3 = overlord.submit(task("task3", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;
    assert_eq!(overlord.snapshot("task3").await.unwrap().state, WorkItemState::Pending);

    clock.advance(Duration::from_millis(150));
    overlord.run_maintenance_once().await;
    overlord.run_assignment_once().await;
    settle().await;
    assert_eq!(overlord.snapshot("task3").await.unwrap().state, WorkItemState::Assigned);

    store
        .create(
            &format!("{}/task3", config.status_path("w1")),
            false,
            serde_json::to_vec(&TaskStatus {
                id: "task3".to_string(),
                code: TaskStatusCode::Success,
                error_message: None,
                location: None,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(handle3.result().await.code, TaskStatusCode::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_rehydrates_in_flight_task_from_store() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 2)).unwrap(),
        )
        .await
        .unwrap();

    {
        let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
        overlord.submit(task("task1", "", 1)).await;
        overlord.run_assignment_once().await;
        settle().await;
        assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Assigned);
        overlord.stop().await;
    }

    // A fresh `Overlord` over the same store picks the task back up
    // without it being resubmitted, and a lookup resolves it the same
    // way a pre-restart instance would have (spec §8 round-trip).
    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    let rehydrated = overlord.lookup("task1").await.unwrap();
    assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Assigned);

    store
        .create(
            &format!("{}/task1", config.status_path("w1")),
            false,
            serde_json::to_vec(&TaskStatus {
                id: "task1".to_string(),
                code: TaskStatusCode::Success,
                error_message: None,
                location: None,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(rehydrated.result().await.code, TaskStatusCode::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitting_same_task_id_returns_existing_handle() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 2)).unwrap(),
        )
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    let handle1 = overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;

    // Re-submitting must not publish a second assignment node.
    let handle2 = overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;
    let sibling_path = format!("{}/task1", config.tasks_path("w1"));
    assert!(store.exists(&sibling_path).await.unwrap());

    store
        .create(
            &format!("{}/task1", config.status_path("w1")),
            false,
            serde_json::to_vec(&TaskStatus {
                id: "task1".to_string(),
                code: TaskStatusCode::Success,
                error_message: None,
                location: None,
            })
            .unwrap(),
        )
        .await
        .unwrap();
    settle().await;

    let (r1, r2) = tokio::join!(handle1.result(), handle2.result());
    assert_eq!(r1.code, TaskStatusCode::Success);
    assert_eq!(r2.code, TaskStatusCode::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_workers_leaves_task_pending_indefinitely() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    overlord.submit(task("task1", "", 1)).await;
    overlord.run_assignment_once().await;
    settle().await;

    assert_eq!(overlord.snapshot("task1").await.unwrap().state, WorkItemState::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn required_capacity_above_every_worker_stays_pending() {
    let store = FakeCoordinationStore::new();
    let clock = ManualClock::new(0);
    let config = OverlordConfig::default();

    store
        .create(
            &format!("{}/w1", config.announcements_path()),
            true,
            serde_json::to_vec(&worker("w1", 2)).unwrap(),
        )
        .await
        .unwrap();

    let overlord = start_overlord(config.clone(), store.clone(), clock.clone()).await;
    overlord.submit(task("too-big", "", 5)).await;
    overlord.run_assignment_once().await;
    settle().await;

    assert_eq!(overlord.snapshot("too-big").await.unwrap().state, WorkItemState::Pending);
}
