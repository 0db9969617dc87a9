// Megumi Download - Episodic media sync
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Mutable state shared by all items of one run

use crate::pipeline::ledger::ProcessedLedger;
use crate::subtitle::source::RuleSourceCache;
use crate::transfer::progress::ProgressCallback;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct RunContext {
    pub ledger: ProcessedLedger,
    pub rule_cache: RuleSourceCache,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
    in_flight: Mutex<HashSet<String>>,
}

impl RunContext {
    pub fn new(ledger: ProcessedLedger) -> Self {
        Self {
            ledger,
            rule_cache: RuleSourceCache::default(),
            cancel: CancellationToken::new(),
            progress: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_rule_cache(mut self, rule_cache: RuleSourceCache) -> Self {
        self.rule_cache = rule_cache;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Mark `remote_path` as in flight; `None` if another task already has it
    pub fn claim(self: &Arc<Self>, remote_path: &str) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if !in_flight.insert(remote_path.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            context: Arc::clone(self),
            remote_path: remote_path.to_string(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Releases an in-flight claim on drop
pub struct InFlightGuard {
    context: Arc<RunContext>,
    remote_path: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.context.in_flight.lock() {
            in_flight.remove(&self.remote_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claim_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let context = Arc::new(RunContext::new(ProcessedLedger::new(temp_dir.path(), false)));

        let guard = context.claim("/done/a.mkv").unwrap();
        assert!(context.claim("/done/a.mkv").is_none());
        assert!(context.claim("/done/b.mkv").is_some());
        assert_eq!(context.in_flight(), 1);

        drop(guard);
        assert_eq!(context.in_flight(), 0);
        assert!(context.claim("/done/a.mkv").is_some());
    }
}
