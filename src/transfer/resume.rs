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


//! Persistent transfer state for resume support
//!
//! # Resume Mechanism
//! 1. The temp file is pre-allocated to the final size, so its length alone
//!    says nothing about completeness
//! 2. A JSON sidecar records the original remote name, the chunk layout and
//!    the confirmed byte count per chunk
//! 3. On restart the sidecar must name the same remote path, size,
//!    modification time and layout; otherwise the file is re-fetched in full
//! 4. Chunks whose confirmed count equals their length are skipped; every
//!    other chunk is fetched again from its start

use crate::error::Result;
use crate::remote::RemoteEntry;
use crate::transfer::plan::{same_layout, ChunkRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sidecar written next to an in-flight temp file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeMarker {
    /// Remote path this temp file belongs to
    pub remote_path: String,

    /// Original remote filename
    pub original_name: String,

    /// Expected final size
    pub size_bytes: u64,

    /// Remote modification time at first attempt
    pub modified_time: Option<DateTime<Utc>>,

    /// Chunk layout of the first attempt
    pub chunks: Vec<ChunkRange>,

    /// Bytes confirmed written and synced, per chunk
    pub confirmed_bytes: Vec<u64>,

    /// Timestamp of last save
    pub timestamp: String,
}

impl ResumeMarker {
    /// Suffix appended to the temp file name
    pub const EXTENSION: &'static str = ".megumi.json";

    /// Create a fresh marker for a planned transfer
    pub fn new(entry: &RemoteEntry, plan: &[ChunkRange]) -> Self {
        Self {
            remote_path: entry.remote_path.clone(),
            original_name: entry.file_name().to_string(),
            size_bytes: entry.size_bytes,
            modified_time: entry.modified_time,
            chunks: plan.to_vec(),
            confirmed_bytes: vec![0; plan.len()],
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Sidecar path for a temp file (`<name>.megumi.json`)
    pub fn marker_path(temp_path: &Path) -> PathBuf {
        let name = temp_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        temp_path.with_file_name(format!("{}{}", name, Self::EXTENSION))
    }

    /// Whether this marker describes a previous attempt at the same transfer
    pub fn matches(&self, entry: &RemoteEntry, plan: &[ChunkRange]) -> bool {
        self.remote_path == entry.remote_path
            && self.size_bytes == entry.size_bytes
            && self.modified_time == entry.modified_time
            && self.confirmed_bytes.len() == self.chunks.len()
            && same_layout(&self.chunks, plan)
    }

    /// Record a fully written chunk
    pub fn confirm(&mut self, index: usize) {
        if let (Some(chunk), Some(slot)) = (self.chunks.get(index), self.confirmed_bytes.get_mut(index)) {
            *slot = chunk.length;
        }
    }

    /// Indices of chunks confirmed complete
    pub fn completed(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .zip(&self.confirmed_bytes)
            .filter(|(chunk, confirmed)| **confirmed == chunk.length)
            .map(|(chunk, _)| chunk.index)
            .collect()
    }

    /// Total bytes confirmed
    pub fn confirmed_total(&self) -> u64 {
        self.confirmed_bytes.iter().sum()
    }

    /// Save marker next to `temp_path` (write + rename)
    pub async fn save(&mut self, temp_path: &Path) -> Result<()> {
        self.timestamp = Utc::now().to_rfc3339();
        let path = Self::marker_path(temp_path);
        let staging = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    /// Load the marker for `temp_path`, if one exists and parses
    pub async fn load(temp_path: &Path) -> Option<Self> {
        let path = Self::marker_path(temp_path);
        let json = tokio::fs::read_to_string(&path).await.ok()?;
        serde_json::from_str(&json).ok()
    }

    /// Delete the marker for `temp_path`
    pub async fn delete(temp_path: &Path) -> Result<()> {
        let path = Self::marker_path(temp_path);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
