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

//! Command-line options for the task runner node, in the same
//! clap-derive-plus-env style as the teacher's standalone/meta-node
//! option structs.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Control-plane node for the remote task runner")]
pub struct NodeOpts {
    /// Comma-separated etcd endpoints backing the coordination store.
    #[clap(long, env = "OVERLORD_ETCD_ENDPOINTS", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoints: String,

    /// Lease TTL granted to this node's ephemeral nodes.
    #[clap(long, env = "OVERLORD_ETCD_LEASE_SECS", default_value = "10")]
    pub etcd_lease_secs: u64,

    /// Path to a TOML config file overriding `OverlordConfig` defaults.
    #[clap(long, env = "OVERLORD_CONFIG_PATH")]
    pub config_path: Option<String>,

    /// Address the HTTP surface binds to.
    #[clap(long, env = "OVERLORD_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,
}

impl NodeOpts {
    pub fn load_config(&self) -> anyhow::Result<overlord_core::config::OverlordConfig> {
        match &self.config_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                overlord_core::config::OverlordConfig::from_toml_str(&contents)
            }
            None => Ok(overlord_core::config::OverlordConfig::default()),
        }
    }
}
