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


//! Remote file store access
//!
//! The pipeline only needs three things from a connected session: a directory
//! listing, a bounded byte-range reader, and removal of finished entries.
//! Session setup and authentication happen before a [`RemoteStore`] is built.
//!
//! # Implementations
//! - [`LocalStore`] - mounted directory (also the move-local source)
//! - [`HttpStore`] - HTTP server with JSON autoindex and range support

pub mod http;
pub mod local;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub use http::HttpStore;
pub use local::LocalStore;

/// Reader over exactly `length` bytes of a remote file
pub type RangeReader = Box<dyn AsyncRead + Send + Unpin>;

/// One file in a remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full remote path (`/`-separated)
    pub remote_path: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// Last modification time, when the store reports one
    pub modified_time: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn new(remote_path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            remote_path: remote_path.into(),
            size_bytes,
            modified_time: None,
        }
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_path)
    }
}

/// Join a remote directory and a file name with exactly one `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Connected remote session
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List regular files directly inside `dir`
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>>;

    /// Open a reader over `[offset, offset + length)` of `path`
    async fn open_range(&self, path: &str, offset: u64, length: u64) -> Result<RangeReader>;

    /// Remove `path` from the store
    async fn remove(&self, path: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        let entry = RemoteEntry::new("/done/[Grp] Show - 01.mkv", 10);
        assert_eq!(entry.file_name(), "[Grp] Show - 01.mkv");
        assert_eq!(RemoteEntry::new("bare.mkv", 1).file_name(), "bare.mkv");
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/done/", "a.mkv"), "/done/a.mkv");
        assert_eq!(join_remote("/done", "a.mkv"), "/done/a.mkv");
        assert_eq!(join_remote("", "a.mkv"), "a.mkv");
    }
}
