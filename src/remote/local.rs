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


//! Remote store backed by a local or mounted directory

use crate::error::{MegumiError, Result};
use crate::remote::{join_remote, RangeReader, RemoteEntry, RemoteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Directory-backed store
///
/// Remote paths are interpreted relative to `root`; a leading `/` is ignored.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto the filesystem, rejecting `..` escapes
    pub fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in remote_path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(MegumiError::InvalidPath(format!(
                        "remote path escapes store root: {}",
                        remote_path
                    )))
                }
                s => path.push(s),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir_path = self.resolve(dir)?;
        let mut entries = fs::read_dir(&dir_path).await.map_err(|e| {
            MegumiError::FileIoError(format!(
                "Failed to list directory {}: {}",
                dir_path.display(),
                e
            ))
        })?;

        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            listing.push(RemoteEntry {
                remote_path: join_remote(dir, &name),
                size_bytes: metadata.len(),
                modified_time: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        listing.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
        Ok(listing)
    }

    async fn open_range(&self, path: &str, offset: u64, length: u64) -> Result<RangeReader> {
        let file_path = self.resolve(path)?;
        let mut file = fs::File::open(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MegumiError::FileNotFound(file_path.display().to_string())
            } else {
                MegumiError::IoError(e)
            }
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::new(file.take(length)))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let file_path = self.resolve(path)?;
        fs::remove_file(&file_path).await.map_err(|e| {
            MegumiError::FileIoError(format!("Delete failed: {}: {}", file_path.display(), e))
        })
    }
}
