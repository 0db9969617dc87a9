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


//! Transfer progress tracking and reporting
//!
//! Chunk workers bump a shared byte counter; the engine samples it on a timer
//! and turns it into [`TransferProgress`] snapshots with a moving-average
//! speed and an ETA.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transfer state as seen by progress listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    /// Planned but no chunk started
    Pending,
    /// Chunks in flight
    Transferring,
    /// All chunks done, checking size
    Verifying,
    /// Byte-exact local copy produced
    Completed,
    /// Gave up; temp file removed
    Failed,
    /// Stopped by the user; temp file kept for resume
    Cancelled,
}

/// Progress snapshot for a single transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Remote filename for display
    pub remote_name: String,

    /// Bytes on disk so far (including resumed chunks)
    pub bytes_done: u64,

    /// Total bytes
    pub total_bytes: u64,

    /// Percentage complete (0.0 - 100.0)
    pub percent_complete: f64,

    /// Bytes per second, moving average
    pub speed: f64,

    /// Estimated seconds remaining (0 if unknown)
    pub eta_seconds: u64,

    pub state: TransferState,

    pub error_message: Option<String>,
}

impl TransferProgress {
    pub fn new(remote_name: String, total_bytes: u64) -> Self {
        Self {
            remote_name,
            bytes_done: 0,
            total_bytes,
            percent_complete: 0.0,
            speed: 0.0,
            eta_seconds: 0,
            state: TransferState::Pending,
            error_message: None,
        }
    }

    fn recalculate(&mut self) {
        self.percent_complete = if self.total_bytes > 0 {
            (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
        } else {
            100.0
        };

        self.eta_seconds = if self.speed > 0.0 {
            let remaining = self.total_bytes.saturating_sub(self.bytes_done);
            (remaining as f64 / self.speed) as u64
        } else {
            0
        };
    }

    /// Format progress as a one-line status
    pub fn display_string(&self) -> String {
        match self.state {
            TransferState::Pending => format!("{}: pending", self.remote_name),
            TransferState::Transferring => format!(
                "{}: {:.1}% ({:.1} / {:.1} MB) - {:.1} MB/s",
                self.remote_name,
                self.percent_complete,
                self.bytes_done as f64 / 1_000_000.0,
                self.total_bytes as f64 / 1_000_000.0,
                self.speed / 1_000_000.0,
            ),
            TransferState::Verifying => format!("{}: verifying", self.remote_name),
            TransferState::Completed => format!("{}: completed", self.remote_name),
            TransferState::Failed => format!(
                "{}: failed - {}",
                self.remote_name,
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            TransferState::Cancelled => format!("{}: cancelled", self.remote_name),
        }
    }
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Speed tracker with a sliding time window
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SpeedTracker {
    /// 10-second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record the cumulative byte count at `now`
    pub fn add_sample(&mut self, now: Instant, position: u64) {
        self.samples.push_back((now, position));
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes per second across the window
    pub fn average_speed(&self) -> f64 {
        let (Some((t0, p0)), Some((t1, p1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(*t0).as_secs_f64();
        if elapsed > 0.0 {
            p1.saturating_sub(*p0) as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress snapshot plus speed tracking and callback throttling
#[derive(Debug)]
pub struct ProgressTracker {
    progress: TransferProgress,
    speed: SpeedTracker,
    last_emit: Option<Instant>,
    emit_interval: Duration,
}

impl ProgressTracker {
    pub fn new(remote_name: String, total_bytes: u64) -> Self {
        Self {
            progress: TransferProgress::new(remote_name, total_bytes),
            speed: SpeedTracker::new(),
            last_emit: None,
            emit_interval: Duration::from_millis(200),
        }
    }

    /// Update with the cumulative byte count.
    ///
    /// Returns true if a callback is due.
    pub fn update(&mut self, bytes_done: u64) -> bool {
        let now = Instant::now();
        self.progress.bytes_done = bytes_done;
        self.speed.add_sample(now, bytes_done);
        self.progress.speed = self.speed.average_speed();
        self.progress.recalculate();

        match self.last_emit {
            Some(at) if now.duration_since(at) < self.emit_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub fn set_state(&mut self, state: TransferState) {
        self.progress.state = state;
    }

    /// Set error message and state to Failed
    pub fn set_error(&mut self, message: String) {
        self.progress.state = TransferState::Failed;
        self.progress.error_message = Some(message);
    }

    pub fn snapshot(&self) -> TransferProgress {
        self.progress.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_and_eta() {
        let mut progress = TransferProgress::new("a.mkv".to_string(), 10_000_000);
        progress.bytes_done = 5_000_000;
        progress.speed = 1_000_000.0;
        progress.recalculate();
        assert_eq!(progress.percent_complete, 50.0);
        assert_eq!(progress.eta_seconds, 5);
    }

    #[test]
    fn test_empty_file_is_complete() {
        let mut progress = TransferProgress::new("empty.mkv".to_string(), 0);
        progress.recalculate();
        assert_eq!(progress.percent_complete, 100.0);
    }

    #[test]
    fn test_speed_tracker_window() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::with_window(Duration::from_secs(2));
        tracker.add_sample(start, 0);
        tracker.add_sample(start + Duration::from_secs(1), 1_000);
        assert_eq!(tracker.average_speed(), 1_000.0);

        // first sample falls out of the window
        tracker.add_sample(start + Duration::from_secs(4), 5_000);
        assert_eq!(tracker.average_speed(), 4_000.0 / 3.0);
    }

    #[test]
    fn test_tracker_throttles_callbacks() {
        let mut tracker = ProgressTracker::new("a.mkv".to_string(), 100);
        assert!(tracker.update(10));
        assert!(!tracker.update(20));
        assert_eq!(tracker.snapshot().bytes_done, 20);
    }
}
