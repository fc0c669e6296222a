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

//! C7 — Report Proxy.
//!
//! Opens a live byte stream from the worker currently hosting a given
//! task (spec §4.7, §6). Built on `reqwest`, the same HTTP client the
//! teacher's own `rpc_client::connector_client` reaches for.

use bytes::Bytes;
use futures::Stream;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::Result;
use crate::model::TaskLocation;

pub struct ReportProxy {
    client: reqwest::Client,
}

impl Default for ReportProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportProxy {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Issues `GET http://<host>:<port>/worker/v1/chat/<taskId>/liveReports`
    /// (`https://` if the location is TLS) and returns the response
    /// body verbatim as a byte stream. `task_id` is percent-encoded so
    /// ids containing whitespace round-trip (spec §3, §6).
    pub async fn open_stream(
        &self,
        location: &TaskLocation,
        task_id: &str,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
        let scheme = if location.tls { "https" } else { "http" };
        let encoded_id = utf8_percent_encode(task_id, NON_ALPHANUMERIC);
        let url = format!(
            "{scheme}://{}:{}/worker/v1/chat/{encoded_id}/liveReports",
            location.host, location.port
        );
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes_stream())
    }
}
