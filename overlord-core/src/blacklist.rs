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

//! C5 — Blacklist Controller.
//!
//! Per-worker consecutive-failure counting with a cluster-wide cap on
//! the blacklisted fraction (spec §4.5). A single mutex-guarded map,
//! per spec §5 "The blacklist is a single mutex-guarded map."

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::model::BlacklistEntry;

pub struct BlacklistController {
    entries: Mutex<HashMap<String, BlacklistEntry>>,
    max_retries_before_blacklist: u32,
    max_percentage_blacklisted: u8,
    backoff_millis: i64,
}

impl BlacklistController {
    pub fn new(
        max_retries_before_blacklist: u32,
        max_percentage_blacklisted: u8,
        backoff_millis: i64,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_retries_before_blacklist,
            max_percentage_blacklisted,
            backoff_millis,
        }
    }

    pub fn is_blacklisted(&self, host: &str, now_millis: i64) -> bool {
        self.entries
            .lock()
            .get(host)
            .map(|e| e.is_blacklisted(now_millis))
            .unwrap_or(false)
    }

    /// Count of workers out of `alive_count` that are currently
    /// blacklisted, for the fraction cap in [`Self::record_failure`]
    /// and for metrics.
    pub fn blacklisted_count(&self, now_millis: i64) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.is_blacklisted(now_millis))
            .count()
    }

    pub fn record_success(&self, host: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(host) {
            let was_blacklisted = entry.blacklisted_until_millis.is_some();
            entry.consecutive_failures = 0;
            entry.blacklisted_until_millis = None;
            if was_blacklisted {
                info!(host, "worker unblacklisted after success");
            }
        }
    }

    /// Returns `true` if this failure caused `host` to become
    /// blacklisted.
    pub fn record_failure(&self, host: &str, alive_count: usize, now_millis: i64) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries.entry(host.to_string()).or_default();
        entry.consecutive_failures += 1;

        if entry.consecutive_failures < self.max_retries_before_blacklist {
            return false;
        }
        if entry.is_blacklisted(now_millis) {
            return false;
        }

        let currently_blacklisted = entries
            .values()
            .filter(|e| e.is_blacklisted(now_millis))
            .count();
        let would_be = currently_blacklisted + 1;
        // Invariant (spec §8.4): blacklisted fraction <= configured cap
        // at all times, so the check must use `would_be`, not the
        // count before this failure.
        if would_be * 100 > self.max_percentage_blacklisted as usize * alive_count.max(1) {
            warn!(
                host,
                consecutive_failures = entry.consecutive_failures,
                "worker eligible for blacklist but cluster cap reached"
            );
            return false;
        }

        let entry = entries.get_mut(host).unwrap();
        entry.blacklisted_until_millis = Some(now_millis + self.backoff_millis);
        warn!(host, until = now_millis + self.backoff_millis, "worker blacklisted");
        true
    }

    /// Re-admits workers whose backoff has elapsed, resetting their
    /// counter (spec §4.5 "periodic sweep").
    pub fn tick_maintenance(&self, now_millis: i64) {
        let mut entries = self.entries.lock();
        for (host, entry) in entries.iter_mut() {
            if let Some(until) = entry.blacklisted_until_millis {
                if until <= now_millis {
                    info!(host, "worker re-admitted after backoff");
                    entry.blacklisted_until_millis = None;
                    entry.consecutive_failures = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklists_after_reaching_threshold() {
        let blacklist = BlacklistController::new(2, 100, 1_000);
        assert!(!blacklist.record_failure("w1", 1, 0));
        assert!(!blacklist.is_blacklisted("w1", 0));
        assert!(blacklist.record_failure("w1", 1, 0));
        assert!(blacklist.is_blacklisted("w1", 0));
    }

    #[test]
    fn success_resets_counter_and_unblacklists() {
        let blacklist = BlacklistController::new(2, 100, 1_000);
        blacklist.record_failure("w1", 1, 0);
        blacklist.record_failure("w1", 1, 0);
        assert!(blacklist.is_blacklisted("w1", 0));
        blacklist.record_success("w1");
        assert!(!blacklist.is_blacklisted("w1", 0));
        // the counter was reset too, so it takes the full threshold again.
        assert!(!blacklist.record_failure("w1", 1, 0));
    }

    #[test]
    fn twenty_five_percent_cap_with_two_workers_blacklists_neither() {
        // spec §8 boundary: with only two workers, a 25% cap rounds down
        // to zero allowed, so no worker is ever blacklisted regardless
        // of how many consecutive failures it racks up.
        let blacklist = BlacklistController::new(1, 25, 1_000);
        for _ in 0..5 {
            blacklist.record_failure("w1", 2, 0);
        }
        assert!(!blacklist.is_blacklisted("w1", 0));
        for _ in 0..5 {
            blacklist.record_failure("w2", 2, 0);
        }
        assert!(!blacklist.is_blacklisted("w2", 0));
    }

    #[test]
    fn readmits_after_backoff_elapses() {
        let blacklist = BlacklistController::new(1, 100, 500);
        blacklist.record_failure("w1", 1, 0);
        assert!(blacklist.is_blacklisted("w1", 100));
        blacklist.tick_maintenance(400);
        assert!(blacklist.is_blacklisted("w1", 400), "backoff has not elapsed yet");
        blacklist.tick_maintenance(600);
        assert!(!blacklist.is_blacklisted("w1", 600));
    }
}
