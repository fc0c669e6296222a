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

//! Core of the remote task runner: the control-plane component that
//! assigns pending tasks to a pool of heterogeneous worker nodes,
//! tracks their lifecycle through a coordination store, and reports
//! outcomes back to upstream callers.
//!
//! Layered the way the teacher's meta node is layered: a handful of
//! single-purpose components (store adapter, worker registry, status
//! cache, assignment engine, blacklist controller) composed by one
//! top-level coordinator (`Overlord`) that owns their lifecycle.

pub mod assignment;
pub mod blacklist;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod report;
pub mod status_cache;
pub mod store;

pub use coordinator::{Overlord, RunHandle};
pub use error::{OverlordError, OverlordErrorInner, Result};
