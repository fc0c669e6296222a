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

//! Metrics emitted by the runner (spec §6), modeled on
//! `risingwave_common_metrics`'s convention of a single struct of
//! `prometheus` collectors registered against one registry at startup.

use prometheus::{
    register_histogram_vec_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntGaugeVec, Registry,
};

pub struct OverlordMetrics {
    pub task_pending_count: IntGaugeVec,
    pub task_running_count: IntGaugeVec,
    pub workers_total_count: IntGaugeVec,
    pub workers_idle_count: IntGaugeVec,
    pub workers_lazy_count: IntGaugeVec,
    pub workers_blacklisted_count: IntGaugeVec,
    pub task_run_time: HistogramVec,
}

impl OverlordMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            task_pending_count: register_int_gauge_vec_with_registry!(
                "task_pending_count",
                "number of tasks currently PENDING",
                &["category"],
                registry
            )
            .unwrap(),
            task_running_count: register_int_gauge_vec_with_registry!(
                "task_running_count",
                "number of tasks currently RUNNING",
                &["category"],
                registry
            )
            .unwrap(),
            workers_total_count: register_int_gauge_vec_with_registry!(
                "workers_total_count",
                "total alive workers",
                &["category"],
                registry
            )
            .unwrap(),
            workers_idle_count: register_int_gauge_vec_with_registry!(
                "workers_idle_count",
                "alive workers with idle capacity",
                &["category"],
                registry
            )
            .unwrap(),
            workers_lazy_count: register_int_gauge_vec_with_registry!(
                "workers_lazy_count",
                "alive workers marked for scale-down by the autoscaler",
                &["category"],
                registry
            )
            .unwrap(),
            workers_blacklisted_count: register_int_gauge_vec_with_registry!(
                "workers_blacklisted_count",
                "alive workers currently blacklisted",
                &["category"],
                registry
            )
            .unwrap(),
            task_run_time: register_histogram_vec_with_registry!(
                "task_run_time",
                "wall-clock time from queue insertion to completion",
                &["task_id", "data_source", "status"],
                registry
            )
            .unwrap(),
        }
    }
}

pub fn new_registry() -> Registry {
    Registry::new()
}
