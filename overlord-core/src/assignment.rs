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

//! C4 — Assignment Engine.
//!
//! Pure selection logic (spec §4.4 rules 1-5) plus the assignment-timer
//! bookkeeping; actually mutating [`crate::model::WorkItem`] state and
//! talking to the store is the coordinator's job (spec §3 "Ownership":
//! C6 exclusively owns the `WorkItem` table), so this module stays
//! side-effect free and easy to unit test on its own, the same split
//! the teacher keeps between `stream::scale`'s pure rebalancing
//! functions and `ClusterManager`'s stateful mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::model::ResourceRequest;

#[derive(Debug, Clone)]
pub struct WorkerCandidate {
    pub host: String,
    pub category: String,
    /// Residual capacity already accounting for in-flight usage and,
    /// if blacklisted, zeroed by the caller (spec §3 `WorkerSlot`
    /// invariant: blacklisted capacity is never reported idle).
    pub idle_capacity: u32,
    pub disabled: bool,
}

#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task_id: String,
    pub resource: ResourceRequest,
    /// Used only to establish FIFO order by the caller; the engine
    /// assumes `pending` is already sorted oldest-first.
    pub queue_insertion_time_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: String,
    pub host: String,
}

/// One pass over the pending queue in insertion order (spec §4.4).
/// Tasks sharing an occupied non-empty availability group are skipped
/// for this pass; the first eligible selection per task decrements its
/// chosen worker's tracked idle capacity and, if the task has a group,
/// marks that group occupied — both scoped to this single pass so
/// later tasks in the same pass see an up-to-date view without
/// touching the real `WorkItem` table.
pub fn select_assignments(
    pending: &[PendingTask],
    occupied_groups: &HashSet<String>,
    candidates: &[WorkerCandidate],
) -> Vec<Assignment> {
    let mut idle: HashMap<&str, u32> = candidates
        .iter()
        .map(|c| (c.host.as_str(), c.idle_capacity))
        .collect();
    let mut occupied = occupied_groups.clone();
    let mut out = Vec::new();

    for task in pending {
        if !task.resource.availability_group.is_empty()
            && occupied.contains(&task.resource.availability_group)
        {
            continue;
        }

        let mut best: Option<&WorkerCandidate> = None;
        for candidate in candidates {
            if candidate.disabled {
                continue;
            }
            if let Some(category) = &task.resource.category {
                if category != &candidate.category {
                    continue;
                }
            }
            let residual = *idle.get(candidate.host.as_str()).unwrap_or(&0);
            if residual < task.resource.required_capacity {
                continue;
            }
            best = Some(match best {
                None => candidate,
                Some(current_best) => {
                    let current_idle = *idle.get(current_best.host.as_str()).unwrap_or(&0);
                    if residual > current_idle
                        || (residual == current_idle && candidate.host < current_best.host)
                    {
                        candidate
                    } else {
                        current_best
                    }
                }
            });
        }

        if let Some(chosen) = best {
            let entry = idle.entry(chosen.host.as_str()).or_insert(0);
            *entry = entry.saturating_sub(task.resource.required_capacity);
            if !task.resource.availability_group.is_empty() {
                occupied.insert(task.resource.availability_group.clone());
            }
            out.push(Assignment {
                task_id: task.task_id.clone(),
                host: chosen.host.clone(),
            });
        }
    }

    out
}

/// Tracks the per-task assignment-timeout deadline (spec §4.4
/// "Assignment timer expiry").
pub struct AssignmentTimers {
    timeout: Duration,
    deadlines: Mutex<HashMap<String, i64>>,
}

impl AssignmentTimers {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            deadlines: Mutex::new(HashMap::new()),
        })
    }

    pub fn start(&self, task_id: &str, now_millis: i64) {
        self.deadlines
            .lock()
            .insert(task_id.to_string(), now_millis + self.timeout.as_millis() as i64);
    }

    pub fn cancel(&self, task_id: &str) {
        self.deadlines.lock().remove(task_id);
    }

    /// Returns, and forgets, every task whose deadline has elapsed.
    pub fn tick_maintenance(&self, now_millis: i64) -> Vec<String> {
        let mut deadlines = self.deadlines.lock();
        let expired: Vec<String> = deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now_millis)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            deadlines.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(host: &str, category: &str, idle: u32) -> WorkerCandidate {
        WorkerCandidate {
            host: host.to_string(),
            category: category.to_string(),
            idle_capacity: idle,
            disabled: false,
        }
    }

    fn task(id: &str, group: &str, required: u32) -> PendingTask {
        PendingTask {
            task_id: id.to_string(),
            resource: ResourceRequest {
                availability_group: group.to_string(),
                required_capacity: required,
                category: None,
            },
            queue_insertion_time_millis: 0,
        }
    }

    #[test]
    fn picks_most_idle_with_deterministic_tiebreak() {
        let candidates = vec![candidate("b", "default", 3), candidate("a", "default", 3)];
        let assignments = select_assignments(&[task("t1", "", 1)], &HashSet::new(), &candidates);
        assert_eq!(assignments, vec![Assignment { task_id: "t1".into(), host: "a".into() }]);
    }

    #[test]
    fn skips_task_whose_group_is_already_occupied() {
        let candidates = vec![candidate("w1", "default", 5)];
        let mut occupied = HashSet::new();
        occupied.insert("g1".to_string());
        let assignments = select_assignments(&[task("t1", "g1", 1)], &occupied, &candidates);
        assert!(assignments.is_empty());
    }

    #[test]
    fn does_not_double_book_capacity_within_one_pass() {
        let candidates = vec![candidate("w1", "default", 1)];
        let assignments = select_assignments(
            &[task("t1", "", 1), task("t2", "", 1)],
            &HashSet::new(),
            &candidates,
        );
        assert_eq!(assignments, vec![Assignment { task_id: "t1".into(), host: "w1".into() }]);
    }

    #[test]
    fn mutually_exclusive_group_within_one_pass() {
        let candidates = vec![candidate("w1", "default", 5), candidate("w2", "default", 5)];
        let assignments = select_assignments(
            &[task("rt1", "g1", 1), task("rt2", "g1", 1), task("rt3", "g2", 1)],
            &HashSet::new(),
            &candidates,
        );
        assert_eq!(
            assignments,
            vec![
                Assignment { task_id: "rt1".into(), host: "w1".into() },
                Assignment { task_id: "rt3".into(), host: "w2".into() },
            ]
        );
    }
}
