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


//! Pipeline orchestrator
//!
//! Drives every listed remote entry through transfer, matching, placement
//! and subtitle processing. Items run concurrently up to the configured
//! item limit and never affect each other: every error is caught at the item
//! boundary and ends up in the [`RunReport`].
//!
//! # Item flow
//! 1. Eligibility: hidden, empty, filtered by release group, already processed
//! 2. Transfer into the temp directory (move-local: size check of the local file)
//! 3. Catalog match and canonical name
//! 4. Atomic placement, `info.txt`, processed marker
//! 5. Subtitle rewrite (never fails the item)
//! 6. Optional removal of the remote entry

use crate::catalog::{Catalog, ReleaseGroups};
use crate::config::SyncConfig;
use crate::error::{MegumiError, Result};
use crate::naming::matcher::Matcher;
use crate::naming::paths::sanitize_filename;
use crate::naming::placement::FileManager;
use crate::pipeline::context::RunContext;
use crate::pipeline::report::{ItemReport, PlannedItem, RunReport};
use crate::pipeline::state::ItemState;
use crate::remote::{LocalStore, RemoteEntry, RemoteStore};
use crate::subtitle::mkvtoolnix::SubtitleMuxer;
use crate::subtitle::processor::{SubtitleOutcome, SubtitleProcessor};
use crate::transfer::engine::{TransferEngine, TransferOptions};
use crate::transfer::resume::ResumeMarker;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One item's walk through the state machine
struct ItemRun {
    report: ItemReport,
}

impl ItemRun {
    fn new(entry: &RemoteEntry) -> Self {
        Self {
            report: ItemReport::new(&entry.remote_path, entry.file_name()),
        }
    }

    fn advance(&mut self, next: ItemState) -> Result<()> {
        let state = self.report.state.transition(next)?;
        debug!(remote = %self.report.remote_path, from = %self.report.state, to = %state, "item state");
        self.report.state = state;
        Ok(())
    }

    fn skip(&mut self, reason: impl Into<String>) -> Result<()> {
        self.advance(ItemState::Skipped)?;
        let reason = reason.into();
        info!(remote = %self.report.remote_path, reason = %reason, "item skipped");
        self.report.reason = Some(reason);
        Ok(())
    }

    fn fail(&mut self, error: &MegumiError) {
        let reason = match error {
            MegumiError::Cancelled => "cancelled, partial transfer kept for the next run".to_string(),
            other if other.is_transfer_error() => format!("transfer: {}", other.user_message()),
            other if other.is_subtitle_error() => format!("subtitles: {}", other.user_message()),
            other => other.user_message(),
        };
        if !self.report.state.can_transition_to(ItemState::Failed) {
            error!(remote = %self.report.remote_path, state = %self.report.state, "failure outside a failable state");
        }
        self.report.state = ItemState::Failed;
        warn!(remote = %self.report.remote_path, error = %error, "item failed");
        self.report.reason = Some(reason);
    }
}

/// Remote listing to library pipeline
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<SyncConfig>,
    store: Arc<dyn RemoteStore>,
    engine: Arc<TransferEngine>,
    matcher: Arc<Matcher>,
    groups: Arc<ReleaseGroups>,
    files: FileManager,
    subtitles: Arc<SubtitleProcessor>,
}

impl Pipeline {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RemoteStore>,
        catalog: Catalog,
        groups: ReleaseGroups,
        muxer: Arc<dyn SubtitleMuxer>,
    ) -> Self {
        let files = FileManager::new(config.local_root.clone());
        let engine = TransferEngine::new(Arc::clone(&store), TransferOptions::from_config(&config));
        let matcher = Matcher::new(Arc::new(catalog), &config);
        let subtitles = SubtitleProcessor::new(muxer, files.clone(), &config);

        Self {
            config: Arc::new(config),
            store,
            engine: Arc::new(engine),
            matcher: Arc::new(matcher),
            groups: Arc::new(groups),
            files,
            subtitles: Arc::new(subtitles),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Directory listed on the store
    ///
    /// Directory stores are rooted at the listed directory itself (see
    /// [`store_for`](crate::pipeline::store_for)); only the HTTP store lists
    /// `remote_root` below its base URL.
    fn listing_root(&self) -> &str {
        if self.config.move_local || self.config.remote_url.is_none() {
            "/"
        } else {
            &self.config.remote_root
        }
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = self.store.list(self.listing_root()).await?;
        entries.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
        Ok(entries)
    }

    /// Process every listed entry and report what happened
    ///
    /// Only a failed listing is an error; item problems end up in the report.
    pub async fn run(&self, ctx: Arc<RunContext>) -> Result<RunReport> {
        let started_at = Utc::now();
        let entries = self.list().await?;
        info!(
            root = self.listing_root(),
            entries = entries.len(),
            concurrency = self.config.item_concurrency,
            "starting run"
        );

        let limit = Arc::new(Semaphore::new(self.config.item_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<String, RemoteEntry> = HashMap::new();

        for entry in entries {
            pending.insert(entry.remote_path.clone(), entry.clone());
            let pipeline = self.clone();
            let ctx = Arc::clone(&ctx);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = match limit.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let mut item = ItemRun::new(&entry);
                        item.fail(&MegumiError::internal("item pool closed"));
                        return item.report;
                    }
                };
                pipeline.process_item(entry, ctx).await
            });
        }

        let mut items = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    pending.remove(&report.remote_path);
                    items.push(report);
                }
                Err(e) => error!(error = %e, "item task aborted"),
            }
        }
        for (_, entry) in pending {
            let mut item = ItemRun::new(&entry);
            item.fail(&MegumiError::internal("item task aborted"));
            items.push(item.report);
        }
        items.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));

        let report = RunReport::new(started_at, items);
        info!(
            done = report.done(),
            skipped = report.skipped(),
            failed = report.failed(),
            "run finished"
        );
        Ok(report)
    }

    /// Placement each eligible entry would get, without touching anything
    pub async fn plan(&self, ctx: &RunContext) -> Result<Vec<PlannedItem>> {
        let mut planned = Vec::new();

        for entry in self.list().await? {
            let mut item = PlannedItem {
                remote_path: entry.remote_path.clone(),
                size_bytes: entry.size_bytes,
                decision: None,
                unrenamed: false,
                note: None,
            };

            if let Some(reason) = self.ineligible(&entry, ctx).await {
                item.note = Some(reason);
            } else {
                match self.source_path(&entry).and_then(|source| self.matcher.resolve(entry.file_name(), &source)) {
                    Ok(outcome) => {
                        item.unrenamed = outcome.unrenamed;
                        item.decision = Some(outcome.decision);
                    }
                    Err(e) => item.note = Some(e.to_string()),
                }
            }
            planned.push(item);
        }

        Ok(planned)
    }

    async fn process_item(&self, entry: RemoteEntry, ctx: Arc<RunContext>) -> ItemReport {
        let mut item = ItemRun::new(&entry);
        if let Err(e) = self.drive(&entry, &ctx, &mut item).await {
            item.fail(&e);
        }

        let report = item.report;
        if report.state == ItemState::Done {
            info!(
                remote = %report.remote_path,
                destination = ?report.final_path,
                unrenamed = report.unrenamed,
                "item done"
            );
        }
        report
    }

    async fn drive(&self, entry: &RemoteEntry, ctx: &Arc<RunContext>, item: &mut ItemRun) -> Result<()> {
        if let Some(reason) = self.ineligible(entry, ctx).await {
            return item.skip(reason);
        }
        let Some(_claim) = ctx.claim(&entry.remote_path) else {
            return item.skip("already being processed");
        };

        item.advance(ItemState::Transferring)?;
        let source = self.fetch(entry, ctx).await?;
        item.advance(ItemState::Verified)?;

        item.advance(ItemState::Matching)?;
        let outcome = match self.matcher.resolve(entry.file_name(), &source) {
            Ok(outcome) => outcome,
            Err(e @ MegumiError::NoCatalogMatch(_)) => {
                self.discard_unmatched(&source).await;
                return item.skip(e.to_string());
            }
            Err(e) => return Err(e),
        };
        if outcome.unrenamed {
            let ambiguous = MegumiError::NamingAmbiguous(entry.file_name().to_string());
            warn!(remote = %entry.remote_path, error = %ambiguous, "keeping original name");
            item.report.unrenamed = true;
            item.report.reason = Some(ambiguous.user_message());
        }

        let final_path = self.files.commit(&outcome.decision).await?;
        item.report.final_path = Some(final_path.clone());
        item.advance(ItemState::Placed)?;

        if self.config.save_info {
            self.files
                .append_info(outcome.decision.season_dir(), entry.file_name(), &outcome.decision.final_name())
                .await?;
        }
        ctx.ledger.record(entry, &final_path).await?;

        item.advance(ItemState::SubtitleProcessing)?;
        let subtitle = if ctx.cancel.is_cancelled() {
            SubtitleOutcome::Skipped("run cancelled".to_string())
        } else {
            self.subtitles
                .process(&final_path, &outcome.rule, outcome.decision.season_dir(), &ctx.rule_cache)
                .await
        };
        item.report.subtitle = Some(subtitle);
        item.advance(ItemState::Done)?;

        if self.config.delete_remote && !self.config.move_local {
            match self.store.remove(&entry.remote_path).await {
                Ok(()) => info!(remote = %entry.remote_path, "removed remote entry"),
                Err(e) => warn!(remote = %entry.remote_path, error = %e, "failed to remove remote entry"),
            }
        }
        Ok(())
    }

    /// Reason to leave `entry` alone, if any
    async fn ineligible(&self, entry: &RemoteEntry, ctx: &RunContext) -> Option<String> {
        let name = entry.file_name();
        if ctx.cancel.is_cancelled() {
            return Some("run cancelled".to_string());
        }
        if name.starts_with('.') || name.ends_with(ResumeMarker::EXTENSION) {
            return Some("hidden or bookkeeping file".to_string());
        }
        if entry.size_bytes == 0 {
            return Some("empty remote file".to_string());
        }
        if !self.groups.admits(name) {
            return Some("release group not listed".to_string());
        }
        if ctx.ledger.is_processed(entry).await {
            return Some("already processed".to_string());
        }
        None
    }

    /// Where the item's bytes live before placement
    fn source_path(&self, entry: &RemoteEntry) -> Result<PathBuf> {
        if self.config.move_local {
            LocalStore::new(self.config.temp_dir.clone()).resolve(&entry.remote_path)
        } else {
            Ok(self.config.temp_dir.join(sanitize_filename(entry.file_name())))
        }
    }

    async fn fetch(&self, entry: &RemoteEntry, ctx: &RunContext) -> Result<PathBuf> {
        let source = self.source_path(entry)?;

        if self.config.move_local {
            let actual = tokio::fs::metadata(&source).await?.len();
            if actual != entry.size_bytes {
                return Err(MegumiError::FileSizeMismatch {
                    expected: entry.size_bytes,
                    actual,
                });
            }
            return Ok(source);
        }

        self.engine
            .transfer(entry, &source, &ctx.cancel, ctx.progress.clone())
            .await?;
        Ok(source)
    }

    /// Unmatched downloads are dropped so the next run fetches them again
    /// once the catalog knows the series; local input is left where it is.
    async fn discard_unmatched(&self, source: &std::path::Path) {
        if self.config.move_local {
            return;
        }
        if let Err(e) = self.files.safe_delete(source).await {
            warn!(path = %source.display(), error = %e, "failed to remove unmatched download");
        }
    }
}
