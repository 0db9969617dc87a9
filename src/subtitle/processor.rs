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


//! Subtitle rewrite of a placed media file
//!
//! # Flow
//! 1. Locate the series ruleset (none means nothing to do)
//! 2. Pick the subtitle track: the configured id, else the first one
//! 3. Extract it next to the media file, rewrite its text payload
//! 4. Remux into a hidden sibling and rename it over the original
//!
//! Nothing here fails the item. Every problem becomes a [`SubtitleOutcome`]
//! and the placed file stays exactly as it was.

use crate::catalog::CatalogRule;
use crate::config::{decode_text, SyncConfig};
use crate::error::{MegumiError, Result};
use crate::naming::placement::FileManager;
use crate::subtitle::mkvtoolnix::{RemuxOptions, SubtitleMuxer, SubtitleTrack};
use crate::subtitle::rules::{rewrite_document, ReplacementRule};
use crate::subtitle::source::{locate_rules, RuleSourceCache};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const UTF8_BOM: &str = "\u{feff}";

/// What the subtitle step did to one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleOutcome {
    /// Track rewritten and remuxed
    Applied { track: u32, rules: usize },
    /// The series has no ruleset
    NotConfigured,
    /// Step not applicable (bad ruleset, no text track)
    Skipped(String),
    /// Tool or I/O failure; media file left untouched
    Failed(String),
}

impl SubtitleOutcome {
    /// Rules existed or were expected but never reached the file
    pub fn needs_attention(&self) -> bool {
        matches!(self, SubtitleOutcome::Failed(_) | SubtitleOutcome::Skipped(_))
    }
}

impl std::fmt::Display for SubtitleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitleOutcome::Applied { track, rules } => {
                write!(f, "applied {} rules to track {}", rules, track)
            }
            SubtitleOutcome::NotConfigured => write!(f, "no ruleset"),
            SubtitleOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            SubtitleOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Temp artifacts of one rewrite, all hidden siblings of the media file
struct Scratch {
    extracted: PathBuf,
    rewritten: PathBuf,
    remuxed: PathBuf,
}

impl Scratch {
    fn new(media: &Path, extension: &str) -> Self {
        let name = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let media_ext = media
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mkv".to_string());

        Self {
            extracted: media.with_file_name(format!(".{}.{}.{}", name, tag, extension)),
            rewritten: media.with_file_name(format!(".{}.{}.fixed.{}", name, tag, extension)),
            remuxed: media.with_file_name(format!(".{}.{}.remux.{}", name, tag, media_ext)),
        }
    }

    async fn remove(&self) {
        for path in [&self.extracted, &self.rewritten, &self.remuxed] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove subtitle temp file");
                }
            }
        }
    }
}

/// Extract/rewrite/remux driver
pub struct SubtitleProcessor {
    muxer: Arc<dyn SubtitleMuxer>,
    files: FileManager,
    track_selector: Option<u32>,
    remux: RemuxOptions,
    standard_fixes: bool,
}

impl SubtitleProcessor {
    pub fn new(muxer: Arc<dyn SubtitleMuxer>, files: FileManager, config: &SyncConfig) -> Self {
        Self {
            muxer,
            files,
            track_selector: config.subtitle_track,
            remux: RemuxOptions::from_config(config),
            standard_fixes: config.standard_fixes,
        }
    }

    /// Rewrite the subtitles of `media`, placed under `season_dir`
    pub async fn process(
        &self,
        media: &Path,
        rule: &CatalogRule,
        season_dir: &Path,
        cache: &RuleSourceCache,
    ) -> SubtitleOutcome {
        let rules = match locate_rules(rule, season_dir, cache, self.standard_fixes).await {
            Ok(Some(rules)) => rules,
            Ok(None) => return SubtitleOutcome::NotConfigured,
            Err(e) => {
                warn!(series = %rule.display_name, error = %e, "skipping subtitle step");
                return SubtitleOutcome::Skipped(e.to_string());
            }
        };

        match self.rewrite(media, &rules).await {
            Ok(track) => {
                info!(media = %media.display(), track, rules = rules.len(), "subtitles rewritten");
                SubtitleOutcome::Applied {
                    track,
                    rules: rules.len(),
                }
            }
            Err(e @ (MegumiError::NoSubtitleTrack(_) | MegumiError::UnsupportedSubtitleCodec(_))) => {
                info!(media = %media.display(), reason = %e, "subtitle step not applicable");
                SubtitleOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                warn!(media = %media.display(), error = %e, "subtitle step failed, media left untouched");
                SubtitleOutcome::Failed(e.user_message())
            }
        }
    }

    fn select_track<'a>(&self, media: &Path, tracks: &'a [SubtitleTrack]) -> Result<&'a SubtitleTrack> {
        let selected = match self.track_selector {
            Some(id) => tracks.iter().find(|t| t.id == id),
            None => tracks.first(),
        };
        selected.ok_or_else(|| match self.track_selector {
            Some(id) => MegumiError::NoSubtitleTrack(format!("{} (track {})", media.display(), id)),
            None => MegumiError::NoSubtitleTrack(media.display().to_string()),
        })
    }

    async fn rewrite(&self, media: &Path, rules: &[ReplacementRule]) -> Result<u32> {
        let tracks = self.muxer.subtitle_tracks(media).await?;
        let track = self.select_track(media, &tracks)?.clone();
        let format = track
            .format()
            .ok_or_else(|| MegumiError::UnsupportedSubtitleCodec(track.codec_id.clone()))?;

        let scratch = Scratch::new(media, format.extension());
        debug!(media = %media.display(), track = track.id, codec = %track.codec_id, "rewriting subtitle track");

        let result: Result<()> = async {
            self.muxer.extract(media, &track, &scratch.extracted).await?;

            let raw = fs::read(&scratch.extracted).await?;
            let had_bom = raw.starts_with(UTF8_BOM.as_bytes());
            let rewritten = rewrite_document(&decode_text(&raw), format, rules);
            let contents = if had_bom {
                format!("{}{}", UTF8_BOM, rewritten)
            } else {
                rewritten
            };
            fs::write(&scratch.rewritten, contents).await?;

            self.muxer
                .remux(media, &track, &scratch.rewritten, &scratch.remuxed, &self.remux)
                .await?;

            let produced = fs::metadata(&scratch.remuxed).await.map(|m| m.len()).unwrap_or(0);
            if produced == 0 {
                return Err(MegumiError::SubtitleToolFailed {
                    tool: "remux".to_string(),
                    code: Some(0),
                    stderr: "output file missing or empty".to_string(),
                });
            }

            self.files.replace_file(&scratch.remuxed, media).await
        }
        .await;

        scratch.remove().await;
        result.map(|()| track.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::source::RULE_FILE_NAME;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Muxer that "remuxes" by writing `media bytes + "|" + subtitle text`
    struct ScriptedMuxer {
        tracks: Vec<SubtitleTrack>,
        subtitle: String,
        fail_remux: bool,
        remuxed: Mutex<Vec<String>>,
    }

    impl ScriptedMuxer {
        fn new(codec_id: &str, subtitle: &str) -> Self {
            Self {
                tracks: vec![SubtitleTrack {
                    id: 2,
                    codec_id: codec_id.to_string(),
                    language: Some("eng".to_string()),
                    name: None,
                    default_track: true,
                }],
                subtitle: subtitle.to_string(),
                fail_remux: false,
                remuxed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SubtitleMuxer for ScriptedMuxer {
        async fn subtitle_tracks(&self, _media: &Path) -> Result<Vec<SubtitleTrack>> {
            Ok(self.tracks.clone())
        }

        async fn extract(&self, _media: &Path, _track: &SubtitleTrack, output: &Path) -> Result<()> {
            fs::write(output, &self.subtitle).await?;
            Ok(())
        }

        async fn remux(
            &self,
            media: &Path,
            _replaced: &SubtitleTrack,
            subtitle: &Path,
            output: &Path,
            _options: &RemuxOptions,
        ) -> Result<()> {
            if self.fail_remux {
                return Err(MegumiError::SubtitleToolFailed {
                    tool: "mkvmerge".to_string(),
                    code: Some(2),
                    stderr: "Error: boom".to_string(),
                });
            }
            let text = fs::read_to_string(subtitle).await?;
            self.remuxed.lock().unwrap().push(text.clone());
            let mut bytes = fs::read(media).await?;
            bytes.extend_from_slice(b"|");
            bytes.extend_from_slice(text.as_bytes());
            fs::write(output, bytes).await?;
            Ok(())
        }
    }

    const ASS: &str = "\u{feff}[Events]\n\
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n\
Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,I-it's Onii-chan\n";

    struct Fixture {
        _temp_dir: TempDir,
        season_dir: PathBuf,
        media: PathBuf,
    }

    fn fixture(rules: Option<&str>) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let season_dir = temp_dir.path().join("Show/Season 01");
        std::fs::create_dir_all(&season_dir).unwrap();
        let media = season_dir.join("Show S01E01.mkv");
        std::fs::write(&media, b"MEDIA").unwrap();
        if let Some(rules) = rules {
            std::fs::write(season_dir.join(RULE_FILE_NAME), rules).unwrap();
        }
        Fixture {
            _temp_dir: temp_dir,
            season_dir,
            media,
        }
    }

    fn processor(muxer: Arc<ScriptedMuxer>, fixes: bool) -> SubtitleProcessor {
        let config = SyncConfig {
            standard_fixes: fixes,
            ..SyncConfig::default()
        };
        SubtitleProcessor::new(muxer, FileManager::new(PathBuf::from("/")), &config)
    }

    fn hidden_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[tokio::test]
    async fn test_rewrite_and_replace() {
        let fx = fixture(Some("Onii-chan|Big Brother\n"));
        let muxer = Arc::new(ScriptedMuxer::new("S_TEXT/ASS", ASS));
        let rule = CatalogRule::new("Show", "Show", 1);

        let outcome = processor(Arc::clone(&muxer), true)
            .process(&fx.media, &rule, &fx.season_dir, &RuleSourceCache::default())
            .await;

        assert!(matches!(outcome, SubtitleOutcome::Applied { track: 2, .. }));
        let remuxed = muxer.remuxed.lock().unwrap()[0].clone();
        assert!(remuxed.starts_with(UTF8_BOM));
        assert!(remuxed.contains(",,I-It's Big Brother\n"));

        let placed = std::fs::read_to_string(&fx.media).unwrap();
        assert!(placed.starts_with("MEDIA|"));
        assert!(hidden_files(&fx.season_dir).is_empty());
    }

    #[tokio::test]
    async fn test_no_ruleset_leaves_file_alone() {
        let fx = fixture(None);
        let muxer = Arc::new(ScriptedMuxer::new("S_TEXT/ASS", ASS));
        let outcome = processor(Arc::clone(&muxer), true)
            .process(&fx.media, &CatalogRule::new("Show", "Show", 1), &fx.season_dir, &RuleSourceCache::default())
            .await;

        assert_eq!(outcome, SubtitleOutcome::NotConfigured);
        assert_eq!(std::fs::read(&fx.media).unwrap(), b"MEDIA");
    }

    #[tokio::test]
    async fn test_tool_failure_keeps_original() {
        let fx = fixture(Some("a|b\n"));
        let mut muxer = ScriptedMuxer::new("S_TEXT/ASS", ASS);
        muxer.fail_remux = true;

        let outcome = processor(Arc::new(muxer), false)
            .process(&fx.media, &CatalogRule::new("Show", "Show", 1), &fx.season_dir, &RuleSourceCache::default())
            .await;

        assert!(matches!(outcome, SubtitleOutcome::Failed(_)));
        assert_eq!(std::fs::read(&fx.media).unwrap(), b"MEDIA");
        assert!(hidden_files(&fx.season_dir).is_empty());
    }

    #[tokio::test]
    async fn test_image_track_and_bad_ruleset_are_skips() {
        let fx = fixture(Some("a|b\n"));
        let outcome = processor(Arc::new(ScriptedMuxer::new("S_HDMV/PGS", "")), false)
            .process(&fx.media, &CatalogRule::new("Show", "Show", 1), &fx.season_dir, &RuleSourceCache::default())
            .await;
        assert!(matches!(outcome, SubtitleOutcome::Skipped(_)));

        let fx = fixture(Some("missing delimiter\n"));
        let outcome = processor(Arc::new(ScriptedMuxer::new("S_TEXT/ASS", ASS)), false)
            .process(&fx.media, &CatalogRule::new("Show", "Show", 1), &fx.season_dir, &RuleSourceCache::default())
            .await;
        assert!(matches!(outcome, SubtitleOutcome::Skipped(_)));
        assert_eq!(std::fs::read(&fx.media).unwrap(), b"MEDIA");
    }

    #[tokio::test]
    async fn test_explicit_track_selector() {
        let fx = fixture(Some("a|b\n"));
        let config = SyncConfig {
            subtitle_track: Some(7),
            ..SyncConfig::default()
        };
        let processor = SubtitleProcessor::new(
            Arc::new(ScriptedMuxer::new("S_TEXT/ASS", ASS)),
            FileManager::new(PathBuf::from("/")),
            &config,
        );

        let outcome = processor
            .process(&fx.media, &CatalogRule::new("Show", "Show", 1), &fx.season_dir, &RuleSourceCache::default())
            .await;
        assert!(matches!(outcome, SubtitleOutcome::Skipped(ref r) if r.contains("track 7")));
    }
}
