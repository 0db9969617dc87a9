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


//! Atomic placement into the library
//!
//! # Key Operations
//! - Commit a [`PlacementDecision`]: the file appears at its final path in a
//!   single rename, never half-written
//! - Replace a library file with a rewritten version (subtitle remux)
//! - Atomic small-file writes (ledger markers)
//! - `info.txt` journal of original names
//!
//! Every write goes to a hidden sibling in the destination directory first,
//! so the final rename never crosses a filesystem boundary.

use crate::error::{MegumiError, Result};
use crate::naming::matcher::{PlacementAction, PlacementDecision};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Name of the original-name journal in each season directory
pub const INFO_FILE_NAME: &str = "info.txt";

/// Library file operations
#[derive(Debug, Clone)]
pub struct FileManager {
    library_root: PathBuf,
}

impl FileManager {
    pub fn new(library_root: PathBuf) -> Self {
        Self { library_root }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Make the decided file visible at its final path
    ///
    /// Copy: temp file is copied beside the destination, synced, renamed into
    /// place, then the temp file is deleted. Move: a plain rename, falling
    /// back to the copy path when source and destination are on different
    /// filesystems. An existing destination file is replaced.
    pub async fn commit(&self, decision: &PlacementDecision) -> Result<PathBuf> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.try_commit(decision).await {
                Ok(()) => {
                    info!(
                        source = %decision.source_temp_path.display(),
                        destination = %decision.final_path.display(),
                        action = ?decision.action,
                        "placed file"
                    );
                    return Ok(decision.final_path.clone());
                }
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(MegumiError::placement(
                        &decision.final_path,
                        format!("failed after {} attempts: {}", MAX_RETRY_ATTEMPTS, e),
                    ));
                }
                Err(e) => {
                    debug!(destination = %decision.final_path.display(), error = %e, "placement attempt failed");
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn try_commit(&self, decision: &PlacementDecision) -> Result<()> {
        let source = &decision.source_temp_path;
        let destination = &decision.final_path;

        if !Self::file_exists(source).await {
            return Err(MegumiError::FileNotFound(source.display().to_string()));
        }
        if let Some(parent) = destination.parent() {
            self.ensure_directory_exists(parent).await?;
        }

        match decision.action {
            PlacementAction::Move => {
                if fs::rename(source, destination).await.is_ok() {
                    return Ok(());
                }
                debug!(source = %source.display(), "rename failed, copying instead");
                self.copy_into_place(source, destination).await?;
            }
            PlacementAction::Copy => self.copy_into_place(source, destination).await?,
        }

        self.safe_delete(source).await
    }

    /// Copy `source` to a hidden sibling of `destination`, sync, rename over
    async fn copy_into_place(&self, source: &Path, destination: &Path) -> Result<()> {
        let staging = staging_path(destination);

        let result: Result<()> = async {
            fs::copy(source, &staging).await.map_err(|e| {
                MegumiError::FileIoError(format!(
                    "Copy failed: {} -> {}: {}",
                    source.display(),
                    staging.display(),
                    e
                ))
            })?;
            sync_file(&staging).await?;
            fs::rename(&staging, destination).await.map_err(|e| {
                MegumiError::FileIoError(format!(
                    "Rename failed: {} -> {}: {}",
                    staging.display(),
                    destination.display(),
                    e
                ))
            })
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        result
    }

    /// Replace `target` with `replacement` in one step
    ///
    /// `replacement` should live in the same directory as `target`.
    pub async fn replace_file(&self, replacement: &Path, target: &Path) -> Result<()> {
        sync_file(replacement).await?;
        if fs::rename(replacement, target).await.is_ok() {
            return Ok(());
        }
        self.copy_into_place(replacement, target).await?;
        self.safe_delete(replacement).await
    }

    /// Atomic write: write to a hidden sibling, sync, then rename
    pub async fn atomic_write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_directory_exists(parent).await?;
        }
        let staging = staging_path(path);

        fs::write(&staging, contents).await.map_err(|e| {
            MegumiError::FileIoError(format!("Failed to write {}: {}", staging.display(), e))
        })?;
        sync_file(&staging).await?;
        fs::rename(&staging, path).await.map_err(|e| {
            MegumiError::FileIoError(format!(
                "Failed to rename {} to {}: {}",
                staging.display(),
                path.display(),
                e
            ))
        })
    }

    /// Append `"<original> (<new>)"` to `info.txt` in `season_dir`
    pub async fn append_info(&self, season_dir: &Path, original_name: &str, new_name: &str) -> Result<()> {
        let path = season_dir.join(INFO_FILE_NAME);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| MegumiError::FileIoError(format!("Failed to open {}: {}", path.display(), e)))?;
        file.write_all(format!("{} ({})\n", original_name, new_name).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    /// Delete with retry; a missing file is not an error
    pub async fn safe_delete(&self, path: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match fs::remove_file(path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(MegumiError::FileIoError(format!(
                        "Failed to delete file after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "delete failed, retrying");
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Create a directory and its parents; existing directories are fine
    pub async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            MegumiError::FileIoError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Hidden, unique sibling of `path`
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    path.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
}

async fn sync_file(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await.map_err(|e| {
        MegumiError::FileIoError(format!("Failed to open {} for sync: {}", path.display(), e))
    })?;
    file.sync_all().await.map_err(|e| {
        MegumiError::FileIoError(format!("Failed to sync {}: {}", path.display(), e))
    })
}
