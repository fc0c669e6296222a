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

//! HTTP surface (spec §6): task submission/lookup, report streaming,
//! Prometheus text exposition, and a liveness probe. Routing follows
//! the teacher's `axum`-based meta node HTTP dashboard convention of
//! one small handler function per route, composed with `Router::new()`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use overlord_core::model::Task;
use overlord_core::Overlord;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_stream::StreamExt;
use thiserror_ext::AsReport;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub overlord: Arc<Overlord>,
    pub registry: Registry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/reports", get(stream_reports))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn submit_task(State(state): State<AppState>, Json(task): Json<Task>) -> Response {
    let task_id = task.id.clone();
    // Check before submitting: `submit` itself is idempotent (re-posting an
    // in-flight id just hands back the existing entry), but the caller needs
    // to know which case it got so it can tell "accepted a new task" apart
    // from "this id is already being tracked" (spec §6, §8 idempotent
    // resubmission).
    let pre_existing = state.overlord.snapshot(&task_id).await;
    state.overlord.submit(task).await;
    match pre_existing {
        Some(snapshot) => (StatusCode::ACCEPTED, Json(snapshot)).into_response(),
        None => (StatusCode::ACCEPTED, Json(serde_json::json!({ "taskId": task_id }))).into_response(),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.overlord.snapshot(&id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stream_reports(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.overlord.stream_reports(&id).await {
        Ok(Some(stream)) => {
            let mapped = stream.map(|chunk| chunk.map_err(std::io::Error::other));
            Response::builder()
                .status(StatusCode::OK)
                .body(Body::from_stream(mapped))
                .unwrap()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(error = %err.as_report(), task_id = %id, "failed to open report stream");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        error!(error = %err.as_report(), "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(axum::http::header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}
