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


//! End-to-end pipeline runs against an in-memory remote store and a scripted
//! subtitle muxer.

use async_trait::async_trait;
use megumi_download::pipeline::ItemState;
use megumi_download::remote::RangeReader;
use megumi_download::subtitle::{RemuxOptions, SubtitleOutcome, SubtitleTrack};
use megumi_download::transfer::plan_chunks;
use megumi_download::transfer::PlanOptions;
use megumi_download::{
    Catalog, CatalogRule, MegumiError, Pipeline, ProcessedLedger, ReleaseGroups, RemoteEntry, RemoteStore, Result,
    RunContext, SubtitleMuxer, SyncConfig,
};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
    /// Reads of these paths hit end of stream at the given byte
    readable_up_to: BTreeMap<String, u64>,
    requests: Mutex<Vec<(String, u64, u64)>>,
    removed: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn with_file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), bytes);
        self
    }

    fn cut_short(mut self, path: &str, limit: u64) -> Self {
        self.readable_up_to.insert(path.to_string(), limit);
        self
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, _dir: &str) -> Result<Vec<RemoteEntry>> {
        Ok(self
            .files
            .iter()
            .map(|(path, bytes)| RemoteEntry::new(path.clone(), bytes.len() as u64))
            .collect())
    }

    async fn open_range(&self, path: &str, offset: u64, length: u64) -> Result<RangeReader> {
        self.requests.lock().unwrap().push((path.to_string(), offset, length));
        let bytes = self
            .files
            .get(path)
            .ok_or_else(|| MegumiError::FileNotFound(path.to_string()))?;
        let limit = self.readable_up_to.get(path).copied().unwrap_or(u64::MAX);
        let start = offset as usize;
        let end = (offset + length).min(limit).max(offset) as usize;
        Ok(Box::new(Cursor::new(bytes[start..end].to_vec())))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.removed.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Muxer whose remux always exits with status 2
struct FailingMuxer {
    calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl SubtitleMuxer for FailingMuxer {
    async fn subtitle_tracks(&self, _media: &Path) -> Result<Vec<SubtitleTrack>> {
        self.calls.lock().unwrap().push("identify");
        Ok(vec![SubtitleTrack {
            id: 2,
            codec_id: "S_TEXT/ASS".to_string(),
            language: Some("eng".to_string()),
            name: None,
            default_track: true,
        }])
    }

    async fn extract(&self, _media: &Path, _track: &SubtitleTrack, output: &Path) -> Result<()> {
        self.calls.lock().unwrap().push("extract");
        tokio::fs::write(output, "[Events]\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,A\n").await?;
        Ok(())
    }

    async fn remux(
        &self,
        _media: &Path,
        _replaced: &SubtitleTrack,
        _subtitle: &Path,
        _output: &Path,
        _options: &RemuxOptions,
    ) -> Result<()> {
        self.calls.lock().unwrap().push("remux");
        Err(MegumiError::SubtitleToolFailed {
            tool: "mkvmerge".to_string(),
            code: Some(2),
            stderr: "Error: The file could not be opened for writing".to_string(),
        })
    }
}

fn failing_muxer() -> Arc<FailingMuxer> {
    Arc::new(FailingMuxer {
        calls: Mutex::new(Vec::new()),
    })
}

fn config(temp_dir: &TempDir) -> SyncConfig {
    SyncConfig {
        local_root: temp_dir.path().join("library"),
        temp_dir: temp_dir.path().join("temp"),
        chunk_count: 4,
        buffer_size: 8 * 1024,
        retry_backoff_ms: 1,
        ..SyncConfig::default()
    }
}

fn catalog() -> Catalog {
    Catalog::new(vec![CatalogRule::new("Show.Name", "Show Name", 1)])
}

fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn context(config: &SyncConfig) -> Arc<RunContext> {
    Arc::new(RunContext::new(ProcessedLedger::new(&config.temp_dir, false)))
}

#[test]
fn four_chunks_of_equal_width() {
    let plan = plan_chunks(
        500_000_000,
        PlanOptions {
            chunked: true,
            chunk_count: 4,
            buffer_size: 1024 * 1024,
        },
    );
    let spans: Vec<(u64, u64)> = plan.iter().map(|c| (c.offset, c.length)).collect();
    assert_eq!(
        spans,
        vec![
            (0, 125_000_000),
            (125_000_000, 125_000_000),
            (250_000_000, 125_000_000),
            (375_000_000, 125_000_000),
        ]
    );
}

#[tokio::test]
async fn matched_entry_is_transferred_renamed_and_done() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir);
    let bytes = content(500_000);
    let store = Arc::new(MemoryStore::default().with_file("/Show.Name.S01E05.mkv", bytes.clone()));
    let muxer = failing_muxer();

    let pipeline = Pipeline::new(
        config.clone(),
        store.clone(),
        catalog(),
        ReleaseGroups::default(),
        muxer.clone(),
    );
    let report = pipeline.run(context(&config)).await.unwrap();

    let item = report.item("/Show.Name.S01E05.mkv").unwrap();
    assert_eq!(item.state, ItemState::Done, "{}", report);
    let expected = config.local_root.join("Show Name/Season 01/Show Name S01E05.mkv");
    assert_eq!(item.final_path.as_deref(), Some(expected.as_path()));
    assert_eq!(std::fs::read(&expected).unwrap(), bytes);
    assert_eq!(item.subtitle, Some(SubtitleOutcome::NotConfigured));
    assert!(muxer.calls.lock().unwrap().is_empty());

    let mut requests = store.requests.lock().unwrap().clone();
    requests.sort_by_key(|r| r.1);
    let spans: Vec<(u64, u64)> = requests.iter().map(|r| (r.1, r.2)).collect();
    assert_eq!(
        spans,
        vec![(0, 125_000), (125_000, 125_000), (250_000, 125_000), (375_000, 125_000)]
    );

    // Temp file and resume marker are gone
    let leftovers: Vec<PathBuf> = std::fs::read_dir(&config.temp_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
    assert!(store.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unmatched_entry_is_skipped_and_library_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir);
    let store = Arc::new(MemoryStore::default().with_file("/Unknown.Series.S02E01.mkv", content(4096)));

    let pipeline = Pipeline::new(config.clone(), store, catalog(), ReleaseGroups::default(), failing_muxer());
    let report = pipeline.run(context(&config)).await.unwrap();

    let item = report.item("/Unknown.Series.S02E01.mkv").unwrap();
    assert_eq!(item.state, ItemState::Skipped);
    assert!(item.reason.as_deref().unwrap().contains("No catalog rule"));
    assert!(!config.local_root.exists());
    assert_eq!((report.done(), report.skipped(), report.failed()), (0, 1, 0));
    assert!(report.to_string().starts_with("done=0 skipped=1 failed=0\n"));
}

#[tokio::test]
async fn subtitle_tool_failure_still_reaches_done() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&temp_dir);
    config.delete_remote = true;
    let bytes = content(70_000);
    let store = Arc::new(MemoryStore::default().with_file("/Show.Name.S01E06.mkv", bytes.clone()));
    let muxer = failing_muxer();

    let season_dir = config.local_root.join("Show Name/Season 01");
    std::fs::create_dir_all(&season_dir).unwrap();
    std::fs::write(season_dir.join("replace.txt"), "A|B\n").unwrap();

    let pipeline = Pipeline::new(
        config.clone(),
        store.clone(),
        catalog(),
        ReleaseGroups::default(),
        muxer.clone(),
    );
    let report = pipeline.run(context(&config)).await.unwrap();

    let item = report.item("/Show.Name.S01E06.mkv").unwrap();
    assert_eq!(item.state, ItemState::Done);
    assert!(matches!(item.subtitle, Some(SubtitleOutcome::Failed(_))));
    assert_eq!(*muxer.calls.lock().unwrap(), vec!["identify", "extract", "remux"]);

    // Placed file is exactly the transferred one
    let placed = season_dir.join("Show Name S01E06.mkv");
    assert_eq!(std::fs::read(&placed).unwrap(), bytes);

    // No subtitle scratch files left behind
    let hidden: Vec<String> = std::fs::read_dir(&season_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(hidden.is_empty(), "{:?}", hidden);

    assert_eq!(*store.removed.lock().unwrap(), vec!["/Show.Name.S01E06.mkv".to_string()]);
    assert!(report.to_string().contains("(subtitles failed:"));
}

#[tokio::test]
async fn items_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&temp_dir);
    let store = Arc::new(
        MemoryStore::default()
            .with_file("/Show.Name.S01E01.mkv", content(10_000))
            .with_file("/Show.Name.S01E02.mkv", content(20_000))
            .with_file("/Nope.S01E01.mkv", content(300))
            .with_file("/Show.Name.S01E03.mkv", Vec::new()),
    );

    let pipeline = Pipeline::new(config.clone(), store, catalog(), ReleaseGroups::default(), failing_muxer());
    let report = pipeline.run(context(&config)).await.unwrap();

    assert_eq!((report.done(), report.skipped(), report.failed()), (2, 2, 0), "{}", report);
    let season_dir = config.local_root.join("Show Name/Season 01");
    assert_eq!(std::fs::read(season_dir.join("Show Name S01E02.mkv")).unwrap(), content(20_000));
    assert_eq!(
        report.item("/Show.Name.S01E03.mkv").unwrap().reason.as_deref(),
        Some("empty remote file")
    );
}

#[tokio::test]
async fn exhausted_chunk_retries_fail_only_that_item() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&temp_dir);
    config.max_chunk_retries = 2;
    let store = Arc::new(
        MemoryStore::default()
            .with_file("/Show.Name.S01E08.mkv", content(40_000))
            .with_file("/Show.Name.S01E09.mkv", content(40_000))
            .cut_short("/Show.Name.S01E09.mkv", 15_000),
    );

    let pipeline = Pipeline::new(config.clone(), store, catalog(), ReleaseGroups::default(), failing_muxer());
    let report = pipeline.run(context(&config)).await.unwrap();

    assert_eq!((report.done(), report.skipped(), report.failed()), (1, 0, 1), "{}", report);
    assert!(report.has_failures());

    let good = report.item("/Show.Name.S01E08.mkv").unwrap();
    assert_eq!(good.state, ItemState::Done);
    let placed = config.local_root.join("Show Name/Season 01/Show Name S01E08.mkv");
    assert_eq!(std::fs::read(&placed).unwrap(), content(40_000));

    let bad = report.item("/Show.Name.S01E09.mkv").unwrap();
    assert_eq!(bad.state, ItemState::Failed);
    assert!(bad.final_path.is_none());
    let reason = bad.reason.as_deref().unwrap();
    assert!(reason.starts_with("transfer: Chunk "), "{}", reason);
    assert!(
        reason.ends_with("could not be fetched after 3 attempts. It will be retried on the next run."),
        "{}",
        reason
    );
    assert!(!config.local_root.join("Show Name/Season 01/Show Name S01E09.mkv").exists());

    // Temp file and resume marker of the failed transfer are gone
    assert!(!config.temp_dir.join("Show.Name.S01E09.mkv").exists());
    assert!(!config.temp_dir.join("Show.Name.S01E09.mkv.megumi.json").exists());

    let ledger = ProcessedLedger::new(&config.temp_dir, false);
    assert!(ledger.lookup("/Show.Name.S01E08.mkv").await.is_some());
    assert!(ledger.lookup("/Show.Name.S01E09.mkv").await.is_none());

    assert!(report
        .to_string()
        .contains("\n  [failed] Show.Name.S01E09.mkv: transfer: Chunk "));
}
