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


//! Single-instance guard
//!
//! An exclusive advisory lock on `megumi_download.lock`. The kernel drops the
//! lock when the holding process exits, so a crashed run never blocks the
//! next one. The file itself is left in place.

use crate::error::{MegumiError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "megumi_download.lock";

/// Held for the whole run; the lock is released on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    /// Lock in the system temp directory
    pub fn acquire() -> Result<Self> {
        Self::acquire_in(&std::env::temp_dir())
    }

    pub fn acquire_in(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                MegumiError::FileIoError(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(MegumiError::InstanceLocked(path));
            }
            return Err(MegumiError::FileIoError(format!(
                "Failed to lock {}: {}",
                path.display(),
                e
            )));
        }

        // The lock is ours from here; a stale PID from a crashed run is overwritten
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        debug!(lock = %path.display(), "instance lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "failed to release instance lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock = InstanceLock::acquire_in(temp_dir.path()).unwrap();
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid, std::process::id().to_string());

        let err = InstanceLock::acquire_in(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MegumiError::InstanceLocked(_)));

        drop(lock);
        assert!(InstanceLock::acquire_in(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_leftover_lock_file_from_crashed_run_is_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        // A killed run leaves the file behind but holds no lock
        std::fs::write(temp_dir.path().join(LOCK_FILE_NAME), "4194303999").unwrap();

        let lock = InstanceLock::acquire_in(temp_dir.path()).unwrap();
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }

    #[test]
    fn test_lock_file_kept_after_release() {
        let temp_dir = TempDir::new().unwrap();
        drop(InstanceLock::acquire_in(temp_dir.path()).unwrap());
        assert!(temp_dir.path().join(LOCK_FILE_NAME).exists());
        drop(InstanceLock::acquire_in(temp_dir.path()).unwrap());
    }
}
