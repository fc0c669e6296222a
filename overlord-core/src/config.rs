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

//! Typed configuration, mirroring `risingwave_common::config`'s pattern
//! of a plain `serde`-deserializable struct with `#[serde(default = ..)]`
//! per field rather than a hand-rolled parser.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlordConfig {
    /// Bound on ASSIGNED -> RUNNING. Default 5 minutes.
    #[serde(with = "humantime_serde")]
    pub task_assignment_timeout: Duration,

    /// Grace period after a worker's ephemeral announcement disappears
    /// before its in-flight tasks are failed.
    #[serde(with = "humantime_serde")]
    pub task_cleanup_timeout: Duration,

    /// Per-worker consecutive failure threshold before blacklisting.
    pub max_retries_before_blacklist: u32,

    /// Cap, as a percentage (0..=100), on the fraction of the cluster
    /// that may be blacklisted at once.
    pub max_percentage_blacklist_workers: u8,

    /// How long a worker stays blacklisted before being re-admitted.
    #[serde(with = "humantime_serde")]
    pub worker_blacklist_backoff: Duration,

    /// Assignment-loop parallelism.
    pub pending_tasks_runner_num_threads: usize,

    /// Period of the maintenance loop (blacklist sweep).
    #[serde(with = "humantime_serde")]
    pub maintenance_tick: Duration,

    /// Root path of the coordination store hierarchy, e.g. `/overlord`.
    pub store_root: String,
}

impl Default for OverlordConfig {
    fn default() -> Self {
        Self {
            task_assignment_timeout: Duration::from_secs(5 * 60),
            task_cleanup_timeout: Duration::from_secs(15),
            max_retries_before_blacklist: 5,
            max_percentage_blacklist_workers: 20,
            worker_blacklist_backoff: Duration::from_secs(60),
            pending_tasks_runner_num_threads: 1,
            maintenance_tick: Duration::from_secs(5),
            store_root: "/overlord".to_string(),
        }
    }
}

impl OverlordConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn announcements_path(&self) -> String {
        format!("{}/announcements", self.store_root)
    }

    pub fn status_path(&self, host: &str) -> String {
        format!("{}/status/{}", self.store_root, host)
    }

    pub fn tasks_path(&self, host: &str) -> String {
        format!("{}/tasks/{}", self.store_root, host)
    }
}
