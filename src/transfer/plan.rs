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


//! Chunk planning
//!
//! A file of `S` bytes is partitioned into ranges covering `[0, S)` with no
//! gaps and no overlaps. The partition is fixed for the lifetime of a
//! transfer job and recorded in the resume marker.

use serde::{Deserialize, Serialize};

/// Lifecycle of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    NotStarted,
    Downloading,
    Done,
}

/// Contiguous byte range fetched as one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    pub state: ChunkState,
}

impl ChunkRange {
    pub fn new(index: usize, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
            state: ChunkState::NotStarted,
        }
    }

    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

/// Inputs to [`plan_chunks`]
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub chunked: bool,
    pub chunk_count: usize,
    pub buffer_size: usize,
}

/// Partition `[0, size)` into ranges
///
/// Chunked mode splits into `chunk_count` equal-width ranges, the last one
/// absorbing the remainder. A single range is used when chunking is off, the
/// file fits in one buffer, or there are fewer bytes than chunks.
pub fn plan_chunks(size: u64, options: PlanOptions) -> Vec<ChunkRange> {
    let count = options.chunk_count.max(1) as u64;

    if !options.chunked || count == 1 || size <= options.buffer_size as u64 || size < count {
        return vec![ChunkRange::new(0, 0, size)];
    }

    let width = size / count;
    (0..count)
        .map(|i| {
            let offset = i * width;
            let length = if i == count - 1 { size - offset } else { width };
            ChunkRange::new(i as usize, offset, length)
        })
        .collect()
}

/// Whether two plans describe the same partition, ignoring chunk state
pub fn same_layout(a: &[ChunkRange], b: &[ChunkRange]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.index == y.index && x.offset == y.offset && x.length == y.length)
}
