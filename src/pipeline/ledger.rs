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


//! "Already processed" markers
//!
//! One JSON file per finished remote entry under
//! `<temp_dir>/.megumi/processed/<sha256(remote_path)>.json`. A remote entry
//! is known when its marker exists; with metadata matching on, size and
//! modification time must agree too, so a re-uploaded file is processed again.

use crate::error::{MegumiError, Result};
use crate::naming::placement::FileManager;
use crate::remote::RemoteEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Contents of one marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub remote_path: String,
    pub size_bytes: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub final_path: PathBuf,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    dir: PathBuf,
    match_metadata: bool,
    files: FileManager,
}

impl ProcessedLedger {
    /// Ledger stored under `temp_dir`
    pub fn new(temp_dir: &Path, match_metadata: bool) -> Self {
        let dir = temp_dir.join(".megumi").join("processed");
        Self {
            files: FileManager::new(dir.clone()),
            dir,
            match_metadata,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, remote_path: &str) -> PathBuf {
        let digest = Sha256::digest(remote_path.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Marker for `remote_path`, if one exists and parses
    pub async fn lookup(&self, remote_path: &str) -> Option<ProcessedRecord> {
        let path = self.marker_path(remote_path);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "ignoring unreadable processed marker");
                None
            }
        }
    }

    pub async fn is_processed(&self, entry: &RemoteEntry) -> bool {
        let Some(record) = self.lookup(&entry.remote_path).await else {
            return false;
        };
        if record.remote_path != entry.remote_path {
            return false;
        }
        if self.match_metadata
            && (record.size_bytes != entry.size_bytes || record.modified_time != entry.modified_time)
        {
            debug!(remote = %entry.remote_path, "remote entry changed since it was processed");
            return false;
        }
        true
    }

    pub async fn record(&self, entry: &RemoteEntry, final_path: &Path) -> Result<()> {
        let record = ProcessedRecord {
            remote_path: entry.remote_path.clone(),
            size_bytes: entry.size_bytes,
            modified_time: entry.modified_time,
            final_path: final_path.to_path_buf(),
            processed_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        self.files
            .atomic_write(&self.marker_path(&entry.remote_path), &json)
            .await
            .map_err(|e| MegumiError::FileIoError(format!("Failed to record processed item: {}", e)))
    }

    pub async fn forget(&self, remote_path: &str) -> Result<()> {
        self.files.safe_delete(&self.marker_path(remote_path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(size: u64) -> RemoteEntry {
        RemoteEntry {
            remote_path: "/done/[Grp] Show - 01.mkv".to_string(),
            size_bytes: size,
            modified_time: Some(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ProcessedLedger::new(temp_dir.path(), false);

        assert!(!ledger.is_processed(&entry(10)).await);
        ledger.record(&entry(10), Path::new("/lib/Show S01E01.mkv")).await.unwrap();

        assert!(ledger.is_processed(&entry(10)).await);
        // Path-only matching ignores a size change
        assert!(ledger.is_processed(&entry(11)).await);

        let marker = ledger.marker_path(&entry(10).remote_path);
        assert!(marker.starts_with(temp_dir.path().join(".megumi/processed")));
        assert_eq!(marker.file_stem().unwrap().len(), 64);

        ledger.forget(&entry(10).remote_path).await.unwrap();
        assert!(!ledger.is_processed(&entry(10)).await);
    }

    #[tokio::test]
    async fn test_metadata_matching() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ProcessedLedger::new(temp_dir.path(), true);
        ledger.record(&entry(10), Path::new("/lib/a.mkv")).await.unwrap();

        assert!(ledger.is_processed(&entry(10)).await);
        assert!(!ledger.is_processed(&entry(11)).await);

        let mut touched = entry(10);
        touched.modified_time = None;
        assert!(!ledger.is_processed(&touched).await);
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ProcessedLedger::new(temp_dir.path(), false);
        let marker = ledger.marker_path(&entry(1).remote_path);
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, b"not json").unwrap();

        assert!(!ledger.is_processed(&entry(1)).await);
    }
}
