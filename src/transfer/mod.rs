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


//! Chunked transfer of remote files into the temp directory
//!
//! # Modules
//! - `plan` - byte-range partitioning
//! - `resume` - JSON sidecar for resuming interrupted transfers
//! - `progress` - speed/ETA tracking and throttled callbacks
//! - `engine` - concurrent chunk workers, retry and verification

pub mod engine;
pub mod plan;
pub mod progress;
pub mod resume;

pub use engine::{TransferEngine, TransferJob, TransferOptions, TransferStatus};
pub use plan::{plan_chunks, ChunkRange, ChunkState, PlanOptions};
pub use progress::{ProgressCallback, ProgressTracker, SpeedTracker, TransferProgress, TransferState};
pub use resume::ResumeMarker;
