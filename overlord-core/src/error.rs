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

//! Error types shared by every component of the task runner core.
//!
//! Mirrors the teacher's `MetaError`/`MetaErrorInner` split: the public
//! error is a thin, cheaply-`Clone`-able wrapper around a `thiserror`
//! enum, so the same failure can be handed to several callers (e.g. a
//! re-submit that rendezvous with an in-flight `WorkItem`).

use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = OverlordError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum OverlordErrorInner {
    #[error("the worker that this task was assigned disappeared")]
    WorkerDisappeared,

    #[error("Canceled for worker cleanup")]
    WorkerCleanupCancel,

    #[error(
        "The worker that this task is assigned did not start it in timeout: {task_id}"
    )]
    AssignmentTimeout { task_id: String },

    #[error("Failed to assign this task. See overlord logs for more details.")]
    AssignmentRaced,

    #[error("{0}")]
    TaskReported(String),

    #[error("coordination store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("malformed data at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("http error: {0}")]
    Http(#[source] anyhow::Error),

    #[error("no such task: {0}")]
    UnknownTask(String),

    #[error("the runner is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct OverlordError(Arc<OverlordErrorInner>);

impl OverlordError {
    pub fn inner(&self) -> &OverlordErrorInner {
        &self.0
    }

    pub fn worker_disappeared() -> Self {
        OverlordErrorInner::WorkerDisappeared.into()
    }

    pub fn worker_cleanup_cancel() -> Self {
        OverlordErrorInner::WorkerCleanupCancel.into()
    }

    pub fn assignment_timeout(task_id: impl Into<String>) -> Self {
        OverlordErrorInner::AssignmentTimeout {
            task_id: task_id.into(),
        }
        .into()
    }

    pub fn assignment_raced() -> Self {
        OverlordErrorInner::AssignmentRaced.into()
    }

    pub fn task_reported(message: impl Into<String>) -> Self {
        OverlordErrorInner::TaskReported(message.into()).into()
    }

    pub fn unknown_task(id: impl Into<String>) -> Self {
        OverlordErrorInner::UnknownTask(id.into()).into()
    }

    pub fn is_worker_disappeared(&self) -> bool {
        matches!(*self.0, OverlordErrorInner::WorkerDisappeared)
    }
}

impl std::fmt::Display for OverlordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for OverlordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<OverlordErrorInner> for OverlordError {
    fn from(inner: OverlordErrorInner) -> Self {
        OverlordError(Arc::new(inner))
    }
}

impl From<etcd_client::Error> for OverlordError {
    fn from(err: etcd_client::Error) -> Self {
        OverlordErrorInner::Store(anyhow::Error::new(err)).into()
    }
}

impl From<reqwest::Error> for OverlordError {
    fn from(err: reqwest::Error) -> Self {
        OverlordErrorInner::Http(anyhow::Error::new(err)).into()
    }
}

impl From<anyhow::Error> for OverlordError {
    fn from(err: anyhow::Error) -> Self {
        OverlordErrorInner::Internal(err).into()
    }
}
