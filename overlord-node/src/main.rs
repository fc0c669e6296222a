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

//! Entry point for the task runner control plane: parses CLI options,
//! wires up the etcd-backed coordination store, starts `Overlord`'s
//! background loops, and serves the HTTP surface. Bootstrap shape
//! follows the teacher's meta node binary: parse opts, init tracing,
//! build the long-lived services, then block on the server future
//! with a signal-triggered graceful shutdown.

mod http;
mod opts;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use overlord_core::clock::{ClockRef, SystemClock};
use overlord_core::metrics::{new_registry, OverlordMetrics};
use overlord_core::store::etcd::EtcdCoordinationStore;
use overlord_core::store::{CoordinationStore, StoreRef};
use overlord_core::Overlord;
use tracing_subscriber::EnvFilter;

use crate::opts::NodeOpts;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = NodeOpts::parse();
    init_tracing();

    let config = opts.load_config()?;
    tracing::info!(?config, "starting overlord node");

    let store: StoreRef = Arc::new(
        EtcdCoordinationStore::connect(
            opts.etcd_endpoints.split(',').map(str::to_string).collect(),
            Duration::from_secs(opts.etcd_lease_secs),
        )
        .await?,
    ) as Arc<dyn CoordinationStore>;

    let registry = new_registry();
    let metrics = Arc::new(OverlordMetrics::new(&registry));
    let clock: ClockRef = Arc::new(SystemClock);

    let overlord = Overlord::start(config, store, clock, metrics).await?;

    let state = http::AppState {
        overlord: overlord.clone(),
        registry,
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&opts.listen_addr).await?;
    tracing::info!(addr = %opts.listen_addr, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    overlord.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
