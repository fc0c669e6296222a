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

//! Data model shared by every component, per spec §3.
//!
//! `Worker` and `TaskStatus` cross the coordination-store boundary as
//! JSON and so derive `Serialize`/`Deserialize`; `WorkItem` is
//! in-memory-only state owned exclusively by the [`crate::coordinator`]
//! table (spec §3 "Ownership").

use serde::{Deserialize, Serialize};

/// An alive worker, as announced under `/announcements/<host>`.
///
/// A worker is *disabled* iff `version` is empty — an externally
/// visible quiesce signal (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub host: String,
    pub ip: String,
    pub version: String,
    pub capacity: u32,
    pub category: String,
}

impl Worker {
    pub fn is_disabled(&self) -> bool {
        self.version.is_empty()
    }
}

/// Derived per-worker capacity breakdown (spec §3 `WorkerSlot`).
///
/// Invariant: `used + idle == total`; `idle` and `blacklisted` are
/// mutually exclusive — a blacklisted worker's capacity is reported
/// entirely as `blacklisted`, never as `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerSlot {
    pub total: u32,
    pub used: u32,
    pub idle: u32,
    pub blacklisted: u32,
}

impl WorkerSlot {
    pub fn new(total: u32, used: u32, is_blacklisted: bool) -> Self {
        let used = used.min(total);
        if is_blacklisted {
            WorkerSlot {
                total,
                used,
                idle: 0,
                blacklisted: total - used,
            }
        } else {
            WorkerSlot {
                total,
                used,
                idle: total - used,
                blacklisted: 0,
            }
        }
    }
}

/// The resource request attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default)]
    pub availability_group: String,
    pub required_capacity: u32,
    #[serde(default)]
    pub category: Option<String>,
}

/// An opaque unit of work, as submitted by an external caller (spec
/// §1: "the core treats a task as an opaque unit with an identifier, a
/// resource request, and a JSON payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub resource: ResourceRequest,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub data_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatusCode {
    Running,
    Success,
    Failed,
}

/// Location of the running task, published by the worker alongside a
/// `RUNNING` status so that [`crate::report`] can open a live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLocation {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

/// A status node written by the worker under `/status/<host>/<taskId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub code: TaskStatusCode,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub location: Option<TaskLocation>,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.code, TaskStatusCode::Success | TaskStatusCode::Failed)
    }
}

/// The lifecycle state of a [`WorkItem`]. Transitions are monotonic:
/// Pending -> Assigned -> Running -> Complete (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkItemState {
    Pending,
    Assigned,
    Running,
    Complete,
}

/// Per-worker consecutive-failure bookkeeping (spec §3, §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct BlacklistEntry {
    pub consecutive_failures: u32,
    pub blacklisted_until_millis: Option<i64>,
}

impl BlacklistEntry {
    pub fn is_blacklisted(&self, now_millis: i64) -> bool {
        self.blacklisted_until_millis
            .map(|until| until > now_millis)
            .unwrap_or(false)
    }
}

/// A snapshot of a [`WorkItem`]'s externally-visible state, handed to
/// HTTP callers without exposing the internal oneshot plumbing.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItemSnapshot {
    pub task_id: String,
    pub state: WorkItemState,
    pub assigned_worker: Option<String>,
    pub location: Option<TaskLocation>,
    pub result: Option<TaskStatus>,
}
