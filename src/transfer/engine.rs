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


//! Chunked concurrent transfer
//!
//! # Flow
//! 1. Plan the chunk layout and look for a resume marker from an earlier run
//! 2. Pre-allocate the temp file to its final size
//! 3. Fetch every unconfirmed chunk on its own range reader, each worker
//!    writing only inside its own byte window
//! 4. Confirm chunks in the marker as they finish
//! 5. Verify the confirmed byte count and the file size, then drop the marker
//!
//! A worker that loses its reader mid-chunk reopens the range at the first
//! unwritten byte. Retries are bounded per chunk; running out fails the whole
//! job and removes the temp file. Cancellation stops workers at the next
//! buffer boundary and keeps the temp file and marker for the next run.

use crate::config::SyncConfig;
use crate::error::{MegumiError, Result};
use crate::remote::{RemoteEntry, RemoteStore};
use crate::transfer::plan::{plan_chunks, ChunkRange, ChunkState, PlanOptions};
use crate::transfer::progress::{ProgressCallback, ProgressTracker, TransferState};
use crate::transfer::resume::ResumeMarker;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress sampling interval
const PROGRESS_TICK: Duration = Duration::from_millis(200);

/// Transfer tuning
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub chunked: bool,
    pub chunk_count: usize,
    pub buffer_size: usize,
    pub max_chunk_retries: u32,

    /// Base delay before the first retry; doubled per attempt up to 32x
    pub retry_backoff: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl TransferOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            chunked: config.chunked,
            chunk_count: config.chunk_count,
            buffer_size: config.buffer_size,
            max_chunk_retries: config.max_chunk_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            chunked: self.chunked,
            chunk_count: self.chunk_count,
            buffer_size: self.buffer_size,
        }
    }

    /// Delay before retry `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(1u32 << attempt.min(5))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Verified,
    Failed,
}

/// One remote file on its way to a local temp path
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub entry: RemoteEntry,
    pub destination_temp_path: PathBuf,
    pub chunk_plan: Vec<ChunkRange>,
    pub status: TransferStatus,
}

impl TransferJob {
    pub fn new(entry: RemoteEntry, destination_temp_path: PathBuf, options: &TransferOptions) -> Self {
        let chunk_plan = plan_chunks(entry.size_bytes, options.plan_options());
        Self {
            entry,
            destination_temp_path,
            chunk_plan,
            status: TransferStatus::Pending,
        }
    }

    /// Number of chunks still to fetch
    pub fn pending_chunks(&self) -> usize {
        self.chunk_plan.iter().filter(|c| !c.is_done()).count()
    }
}

/// Chunked transfer engine bound to one remote store
pub struct TransferEngine {
    store: Arc<dyn RemoteStore>,
    options: TransferOptions,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn RemoteStore>, options: TransferOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Transfer `entry` to `destination`, producing a byte-exact copy
    ///
    /// Returns the verified job. On failure the temp file and marker are
    /// removed; on cancellation both are kept and `Cancelled` is returned.
    pub async fn transfer(
        &self,
        entry: &RemoteEntry,
        destination: &Path,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferJob> {
        let mut job = TransferJob::new(entry.clone(), destination.to_path_buf(), &self.options);
        let mut tracker = ProgressTracker::new(entry.file_name().to_string(), entry.size_bytes);

        job.status = TransferStatus::InProgress;
        let result = self.run_job(&mut job, &mut tracker, cancel, progress.as_ref()).await;

        match result {
            Ok(()) => {
                job.status = TransferStatus::Verified;
                ResumeMarker::delete(destination).await?;
                tracker.set_state(TransferState::Completed);
                emit(progress.as_ref(), &tracker);
                info!(remote = %entry.remote_path, bytes = entry.size_bytes, "transfer verified");
                Ok(job)
            }
            Err(MegumiError::Cancelled) => {
                tracker.set_state(TransferState::Cancelled);
                emit(progress.as_ref(), &tracker);
                info!(remote = %entry.remote_path, "transfer cancelled, temp file kept for resume");
                Err(MegumiError::Cancelled)
            }
            Err(e) => {
                job.status = TransferStatus::Failed;
                tracker.set_error(e.to_string());
                emit(progress.as_ref(), &tracker);
                warn!(remote = %entry.remote_path, error = %e, "transfer failed, discarding temp file");
                discard(destination).await;
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        job: &mut TransferJob,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let destination = job.destination_temp_path.clone();
        let size = job.entry.size_bytes;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut marker = match self.resumable_marker(job).await {
            Some(marker) => {
                for index in marker.completed() {
                    job.chunk_plan[index].state = ChunkState::Done;
                }
                info!(
                    remote = %job.entry.remote_path,
                    resumed_chunks = job.chunk_plan.len() - job.pending_chunks(),
                    "resuming transfer"
                );
                marker
            }
            None => ResumeMarker::new(&job.entry, &job.chunk_plan),
        };

        let resuming = marker.confirmed_total() > 0;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(!resuming)
            .open(&destination)
            .await?;
        file.set_len(size).await?;
        drop(file);
        marker.save(&destination).await?;

        let bytes_done = Arc::new(AtomicU64::new(marker.confirmed_total()));
        let worker_cancel = cancel.child_token();
        let pool = Arc::new(Semaphore::new(self.options.chunk_count.max(1)));
        let mut workers = JoinSet::new();

        for chunk in job.chunk_plan.iter_mut().filter(|c| !c.is_done()) {
            chunk.state = ChunkState::Downloading;
            let worker = ChunkWorker {
                store: Arc::clone(&self.store),
                remote_path: job.entry.remote_path.clone(),
                destination: destination.clone(),
                chunk: chunk.clone(),
                options: self.options.clone(),
                bytes_done: Arc::clone(&bytes_done),
                cancel: worker_cancel.clone(),
            };
            let pool = Arc::clone(&pool);
            workers.spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| MegumiError::internal("chunk worker pool closed"))?;
                worker.run().await
            });
        }

        tracker.set_state(TransferState::Transferring);
        let mut failure: Option<MegumiError> = None;
        let mut ticker = tokio::time::interval(PROGRESS_TICK);

        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    let outcome = match joined {
                        None => break,
                        Some(Ok(outcome)) => outcome,
                        Some(Err(e)) => Err(MegumiError::internal(format!("chunk worker panicked: {}", e))),
                    };
                    match outcome {
                        Ok(index) => {
                            job.chunk_plan[index].state = ChunkState::Done;
                            marker.confirm(index);
                            if let Err(e) = marker.save(&destination).await {
                                failure.get_or_insert(e);
                                worker_cancel.cancel();
                            }
                            debug!(remote = %job.entry.remote_path, chunk = index, "chunk done");
                        }
                        Err(MegumiError::Cancelled) => {}
                        Err(e) => {
                            if failure.is_none() {
                                failure = Some(e);
                                worker_cancel.cancel();
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    if tracker.update(bytes_done.load(Ordering::Relaxed)) {
                        emit(progress, tracker);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancel.is_cancelled() || job.pending_chunks() > 0 {
            return Err(MegumiError::Cancelled);
        }

        tracker.update(bytes_done.load(Ordering::Relaxed));
        tracker.set_state(TransferState::Verifying);
        emit(progress, tracker);

        let confirmed = marker.confirmed_total();
        if confirmed != size {
            return Err(MegumiError::FileSizeMismatch {
                expected: size,
                actual: confirmed,
            });
        }
        let on_disk = tokio::fs::metadata(&destination).await?.len();
        if on_disk != size {
            return Err(MegumiError::FileSizeMismatch {
                expected: size,
                actual: on_disk,
            });
        }

        Ok(())
    }

    /// Marker from an earlier attempt, if it describes this exact transfer
    /// and the temp file is already at full size
    async fn resumable_marker(&self, job: &TransferJob) -> Option<ResumeMarker> {
        let marker = ResumeMarker::load(&job.destination_temp_path).await?;
        let on_disk = tokio::fs::metadata(&job.destination_temp_path).await.ok()?.len();

        if on_disk == job.entry.size_bytes && marker.matches(&job.entry, &job.chunk_plan) {
            Some(marker)
        } else {
            debug!(
                remote = %job.entry.remote_path,
                "stale resume marker, fetching the whole file again"
            );
            None
        }
    }
}

/// Everything one chunk task owns
struct ChunkWorker {
    store: Arc<dyn RemoteStore>,
    remote_path: String,
    destination: PathBuf,
    chunk: ChunkRange,
    options: TransferOptions,
    bytes_done: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl ChunkWorker {
    /// Fetch the chunk, retrying from the first unwritten byte
    async fn run(mut self) -> Result<usize> {
        let mut file = OpenOptions::new().write(true).open(&self.destination).await?;
        let mut buffer = vec![0u8; self.options.buffer_size.max(1)];
        let mut position = self.chunk.offset;
        let mut attempt = 0u32;

        loop {
            self.chunk.state = ChunkState::Downloading;
            match self.copy_span(&mut file, &mut position, &mut buffer).await {
                Ok(()) => break,
                Err(MegumiError::Cancelled) => return Err(MegumiError::Cancelled),
                Err(e) if e.is_retryable() && attempt < self.options.max_chunk_retries => {
                    attempt += 1;
                    self.chunk.state = ChunkState::NotStarted;
                    let delay = self.options.backoff(attempt);
                    warn!(
                        remote = %self.remote_path,
                        chunk = self.chunk.index,
                        attempt,
                        offset = position,
                        error = %e,
                        "chunk read failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(MegumiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    return Err(MegumiError::ChunkRetriesExhausted {
                        index: self.chunk.index,
                        attempts: attempt + 1,
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }

        file.flush().await?;
        file.sync_data().await?;
        self.chunk.state = ChunkState::Done;
        Ok(self.chunk.index)
    }

    /// Copy `[position, chunk end)` from a fresh range reader
    async fn copy_span(&self, file: &mut File, position: &mut u64, buffer: &mut [u8]) -> Result<()> {
        let end = self.chunk.end();
        if *position >= end {
            return Ok(());
        }

        let mut reader = self
            .store
            .open_range(&self.remote_path, *position, end - *position)
            .await?;
        file.flush().await?;
        file.seek(SeekFrom::Start(*position)).await?;

        while *position < end {
            if self.cancel.is_cancelled() {
                return Err(MegumiError::Cancelled);
            }
            let want = buffer.len().min((end - *position) as usize);
            let read = reader.read(&mut buffer[..want]).await.map_err(|e| {
                MegumiError::network_error(format!("read of {} failed: {}", self.remote_path, e), true)
            })?;
            if read == 0 {
                return Err(MegumiError::TransferInterrupted {
                    path: self.remote_path.clone(),
                    offset: *position,
                });
            }
            file.write_all(&buffer[..read]).await?;
            *position += read as u64;
            self.bytes_done.fetch_add(read as u64, Ordering::Relaxed);
        }

        Ok(())
    }
}

fn emit(callback: Option<&ProgressCallback>, tracker: &ProgressTracker) {
    if let Some(callback) = callback {
        callback(tracker.snapshot());
    }
}

/// Remove temp file and marker, ignoring anything already gone
async fn discard(destination: &Path) {
    if let Err(e) = tokio::fs::remove_file(destination).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %destination.display(), error = %e, "failed to remove temp file");
        }
    }
    if let Err(e) = ResumeMarker::delete(destination).await {
        warn!(path = %destination.display(), error = %e, "failed to remove resume marker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RangeReader;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory store that records every range request
    #[derive(Default)]
    struct MemoryStore {
        files: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<(u64, u64)>>,
        /// Offsets whose first request is cut short after this many bytes
        short_once: Mutex<HashMap<u64, usize>>,
        /// Every response is cut short after this many bytes
        always_short: Option<usize>,
        /// Earlier offsets answer later
        stagger: bool,
    }

    impl MemoryStore {
        fn with_file(path: &str, data: Vec<u8>) -> Self {
            let mut files = HashMap::new();
            files.insert(path.to_string(), data);
            Self {
                files,
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<(u64, u64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        async fn list(&self, _dir: &str) -> Result<Vec<RemoteEntry>> {
            Ok(Vec::new())
        }

        async fn open_range(&self, path: &str, offset: u64, length: u64) -> Result<RangeReader> {
            self.requests.lock().unwrap().push((offset, length));
            if self.stagger {
                tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(offset / 300))).await;
            }

            let data = self
                .files
                .get(path)
                .ok_or_else(|| MegumiError::FileNotFound(path.to_string()))?;
            let start = offset as usize;
            let mut end = start + length as usize;
            if let Some(cut) = self.short_once.lock().unwrap().remove(&offset) {
                end = start + cut;
            }
            if let Some(cut) = self.always_short {
                end = end.min(start + cut);
            }
            Ok(Box::new(std::io::Cursor::new(data[start..end].to_vec())))
        }

        async fn remove(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    fn sample(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn options(chunk_count: usize, buffer_size: usize) -> TransferOptions {
        TransferOptions {
            chunked: true,
            chunk_count,
            buffer_size,
            max_chunk_retries: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let opts = TransferOptions {
            retry_backoff: Duration::from_millis(10),
            ..options(1, 1)
        };
        assert_eq!(opts.backoff(1), Duration::from_millis(20));
        assert_eq!(opts.backoff(9), Duration::from_millis(320));
    }

    #[tokio::test]
    async fn test_out_of_order_completion_is_byte_exact() {
        let data = sample(10_003);
        let mut store = MemoryStore::with_file("/done/a.mkv", data.clone());
        store.stagger = true;
        let store = Arc::new(store);
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");

        let engine = TransferEngine::new(store.clone(), options(4, 64));
        let job = engine
            .transfer(&RemoteEntry::new("/done/a.mkv", 10_003), &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(job.status, TransferStatus::Verified);
        assert_eq!(job.chunk_plan.len(), 4);
        assert!(job.chunk_plan.iter().all(|c| c.is_done()));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert!(ResumeMarker::load(&dest).await.is_none());
    }

    #[tokio::test]
    async fn test_short_read_retries_from_current_offset() {
        let data = sample(4_000);
        let store = MemoryStore::with_file("/done/a.mkv", data.clone());
        // chunk 1 starts at 1000; its first response stops 300 bytes in
        store.short_once.lock().unwrap().insert(1_000, 300);
        let store = Arc::new(store);
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");

        let engine = TransferEngine::new(store.clone(), options(4, 100));
        engine
            .transfer(&RemoteEntry::new("/done/a.mkv", 4_000), &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert!(store.requests().contains(&(1_300, 700)));
        assert_eq!(store.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_resume_skips_confirmed_chunks() {
        let data = sample(4_000);
        let entry = RemoteEntry::new("/done/a.mkv", 4_000);
        let opts = options(4, 100);
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");

        // previous run finished chunks 0 and 2
        let mut partial = vec![0u8; 4_000];
        partial[..1_000].copy_from_slice(&data[..1_000]);
        partial[2_000..3_000].copy_from_slice(&data[2_000..3_000]);
        tokio::fs::write(&dest, &partial).await.unwrap();
        let plan = TransferJob::new(entry.clone(), dest.clone(), &opts).chunk_plan;
        let mut marker = ResumeMarker::new(&entry, &plan);
        marker.confirm(0);
        marker.confirm(2);
        marker.save(&dest).await.unwrap();

        let store = Arc::new(MemoryStore::with_file("/done/a.mkv", data.clone()));
        let engine = TransferEngine::new(store.clone(), opts);
        engine
            .transfer(&entry, &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        let mut offsets: Vec<u64> = store.requests().iter().map(|(o, _)| *o).collect();
        offsets.sort();
        assert_eq!(offsets, vec![1_000, 3_000]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_changed_layout_refetches_everything() {
        let data = sample(4_000);
        let entry = RemoteEntry::new("/done/a.mkv", 4_000);
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");

        tokio::fs::write(&dest, vec![0u8; 4_000]).await.unwrap();
        let old_plan = TransferJob::new(entry.clone(), dest.clone(), &options(2, 100)).chunk_plan;
        let mut marker = ResumeMarker::new(&entry, &old_plan);
        marker.confirm(0);
        marker.save(&dest).await.unwrap();

        let store = Arc::new(MemoryStore::with_file("/done/a.mkv", data.clone()));
        let engine = TransferEngine::new(store.clone(), options(4, 100));
        engine
            .transfer(&entry, &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(store.requests().len(), 4);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_exhausted_retries_discard_temp_file() {
        let mut store = MemoryStore::with_file("/done/a.mkv", sample(4_000));
        store.always_short = Some(10);
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");

        let mut opts = options(2, 100);
        opts.max_chunk_retries = 2;
        let engine = TransferEngine::new(Arc::new(store), opts);
        let err = engine
            .transfer(&RemoteEntry::new("/done/a.mkv", 4_000), &dest, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, MegumiError::ChunkRetriesExhausted { attempts: 3, .. }));
        assert!(!dest.exists());
        assert!(!ResumeMarker::marker_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancel_keeps_temp_file_and_marker() {
        let store = Arc::new(MemoryStore::with_file("/done/a.mkv", sample(4_000)));
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let engine = TransferEngine::new(store, options(4, 100));
        let err = engine
            .transfer(&RemoteEntry::new("/done/a.mkv", 4_000), &dest, &cancel, None)
            .await
            .unwrap_err();

        assert!(matches!(err, MegumiError::Cancelled));
        assert!(dest.exists());
        assert!(ResumeMarker::load(&dest).await.is_some());
    }

    #[tokio::test]
    async fn test_progress_ends_completed() {
        let store = Arc::new(MemoryStore::with_file("/done/a.mkv", sample(2_000)));
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a.mkv");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        let engine = TransferEngine::new(store, options(2, 100));
        engine
            .transfer(
                &RemoteEntry::new("/done/a.mkv", 2_000),
                &dest,
                &CancellationToken::new(),
                Some(callback),
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.state, TransferState::Completed);
        assert_eq!(last.bytes_done, 2_000);
    }
}
