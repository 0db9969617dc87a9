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


//! Container demux/mux through MKVToolNix
//!
//! # Commands
//! - Identify: `mkvmerge -J input.mkv`
//! - Extract: `mkvextract input.mkv tracks <id>:<out.ass>`
//! - Remux: `mkvmerge -o out.mkv --subtitle-tracks !<id> input.mkv
//!   --language 0:eng --track-name 0:<name> --default-track-flag 0:<yes|no>
//!   out.ass --track-order 0:0,..,0:<id-1>,1:0`
//!
//! The rewritten track takes the slot and default flag of the one it replaces.
//!
//! The exit code is the only success signal consulted.

use crate::config::SyncConfig;
use crate::error::{MegumiError, Result};
use crate::subtitle::rules::SubtitleFormat;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Subtitle track as reported by the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub id: u32,
    pub codec_id: String,
    pub language: Option<String>,
    pub name: Option<String>,
    pub default_track: bool,
}

impl SubtitleTrack {
    /// Text format of this track, `None` for image-based codecs
    pub fn format(&self) -> Option<SubtitleFormat> {
        match self.codec_id.as_str() {
            "S_TEXT/ASS" => Some(SubtitleFormat::Ass),
            "S_TEXT/SSA" => Some(SubtitleFormat::Ssa),
            "S_TEXT/UTF8" => Some(SubtitleFormat::Srt),
            _ => None,
        }
    }
}

/// Language and name given to the rewritten track
#[derive(Debug, Clone)]
pub struct RemuxOptions {
    pub language: String,
    pub track_name: String,
}

impl RemuxOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            language: config.subtitle_language.clone(),
            track_name: config.subtitle_track_name.clone(),
        }
    }
}

/// Demux/mux capability
#[async_trait]
pub trait SubtitleMuxer: Send + Sync {
    /// Subtitle tracks in container order
    async fn subtitle_tracks(&self, media: &Path) -> Result<Vec<SubtitleTrack>>;

    /// Export `track` of `media` to `output`
    async fn extract(&self, media: &Path, track: &SubtitleTrack, output: &Path) -> Result<()>;

    /// Write `output`: `media` with `replaced` swapped for `subtitle`
    async fn remux(
        &self,
        media: &Path,
        replaced: &SubtitleTrack,
        subtitle: &Path,
        output: &Path,
        options: &RemuxOptions,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct Identification {
    #[serde(default)]
    tracks: Vec<IdentifiedTrack>,
}

#[derive(Debug, Deserialize)]
struct IdentifiedTrack {
    id: u32,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: TrackProperties,
}

#[derive(Debug, Default, Deserialize)]
struct TrackProperties {
    codec_id: Option<String>,
    language: Option<String>,
    track_name: Option<String>,
    default_track: Option<bool>,
}

/// Subtitle tracks from `mkvmerge -J` output
pub fn parse_identification(json: &str) -> Result<Vec<SubtitleTrack>> {
    let identification: Identification = serde_json::from_str(json)?;
    Ok(identification
        .tracks
        .into_iter()
        .filter(|t| t.kind == "subtitles")
        .map(|t| SubtitleTrack {
            id: t.id,
            codec_id: t.properties.codec_id.unwrap_or_default(),
            language: t.properties.language,
            name: t.properties.track_name,
            default_track: t.properties.default_track.unwrap_or(false),
        })
        .collect())
}

/// MKVToolNix subprocess implementation
#[derive(Debug, Clone)]
pub struct MkvToolNix {
    mkvextract: PathBuf,
    mkvmerge: PathBuf,
}

impl MkvToolNix {
    pub fn new(mkvextract: PathBuf, mkvmerge: PathBuf) -> Self {
        Self { mkvextract, mkvmerge }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.mkvextract.clone(), config.mkvmerge.clone())
    }

    pub fn identify_args(media: &Path) -> Vec<OsString> {
        vec!["-J".into(), media.into()]
    }

    pub fn extract_args(media: &Path, track: &SubtitleTrack, output: &Path) -> Vec<OsString> {
        let mut target = OsString::from(format!("{}:", track.id));
        target.push(output);
        vec![media.into(), "tracks".into(), target]
    }

    pub fn remux_args(
        media: &Path,
        replaced: &SubtitleTrack,
        subtitle: &Path,
        output: &Path,
        options: &RemuxOptions,
    ) -> Vec<OsString> {
        vec![
            "-o".into(),
            output.into(),
            "--subtitle-tracks".into(),
            format!("!{}", replaced.id).into(),
            media.into(),
            "--language".into(),
            format!("0:{}", options.language).into(),
            "--track-name".into(),
            format!("0:{}", options.track_name).into(),
            "--default-track-flag".into(),
            format!("0:{}", if replaced.default_track { "yes" } else { "no" }).into(),
            subtitle.into(),
            "--track-order".into(),
            Self::track_order(replaced).into(),
        ]
    }

    /// Source tracks ahead of `replaced`, then the rewritten file's track.
    /// mkvmerge numbers tracks contiguously and appends unlisted ones.
    fn track_order(replaced: &SubtitleTrack) -> String {
        (0..replaced.id)
            .map(|id| format!("0:{}", id))
            .chain(std::iter::once("1:0".to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn run(tool: &Path, args: Vec<OsString>) -> Result<Output> {
        let name = tool.display().to_string();
        debug!(tool = %name, ?args, "running");

        let output = Command::new(tool)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MegumiError::SubtitleToolMissing { tool: name.clone() },
                _ => MegumiError::SubtitleToolFailed {
                    tool: name.clone(),
                    code: None,
                    stderr: e.to_string(),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            // mkvmerge reports errors on stdout
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(MegumiError::SubtitleToolFailed {
                tool: name,
                code: output.status.code(),
                stderr: detail.trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl SubtitleMuxer for MkvToolNix {
    async fn subtitle_tracks(&self, media: &Path) -> Result<Vec<SubtitleTrack>> {
        let output = Self::run(&self.mkvmerge, Self::identify_args(media)).await?;
        parse_identification(&String::from_utf8_lossy(&output.stdout))
    }

    async fn extract(&self, media: &Path, track: &SubtitleTrack, output: &Path) -> Result<()> {
        Self::run(&self.mkvextract, Self::extract_args(media, track, output)).await?;
        Ok(())
    }

    async fn remux(
        &self,
        media: &Path,
        replaced: &SubtitleTrack,
        subtitle: &Path,
        output: &Path,
        options: &RemuxOptions,
    ) -> Result<()> {
        Self::run(
            &self.mkvmerge,
            Self::remux_args(media, replaced, subtitle, output, options),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u32, codec_id: &str) -> SubtitleTrack {
        SubtitleTrack {
            id,
            codec_id: codec_id.to_string(),
            language: None,
            name: None,
            default_track: false,
        }
    }

    #[test]
    fn test_parse_identification() {
        let json = r#"{
            "container": { "type": "Matroska" },
            "tracks": [
                { "id": 0, "type": "video", "codec": "AVC", "properties": { "codec_id": "V_MPEG4/ISO/AVC" } },
                { "id": 1, "type": "audio", "codec": "AAC", "properties": { "codec_id": "A_AAC", "language": "jpn" } },
                { "id": 2, "type": "subtitles", "codec": "SubStationAlpha",
                  "properties": { "codec_id": "S_TEXT/ASS", "language": "eng", "track_name": "Full", "default_track": true } },
                { "id": 3, "type": "subtitles", "codec": "HDMV PGS", "properties": { "codec_id": "S_HDMV/PGS" } }
            ]
        }"#;
        let tracks = parse_identification(json).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, 2);
        assert_eq!(tracks[0].format(), Some(SubtitleFormat::Ass));
        assert_eq!(tracks[0].name.as_deref(), Some("Full"));
        assert!(tracks[0].default_track);
        assert_eq!(tracks[1].format(), None);
        assert!(!tracks[1].default_track);
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(track(1, "S_TEXT/SSA").format(), Some(SubtitleFormat::Ssa));
        assert_eq!(track(1, "S_TEXT/UTF8").format(), Some(SubtitleFormat::Srt));
        assert_eq!(track(1, "S_VOBSUB").format(), None);
    }

    #[test]
    fn test_command_lines() {
        let media = Path::new("/lib/Show S01E01.mkv");
        let sub = Path::new("/lib/.sub.ass");
        let out = Path::new("/lib/.remux.mkv");
        let mut t = track(2, "S_TEXT/ASS");
        t.default_track = true;

        assert_eq!(
            MkvToolNix::extract_args(media, &t, sub),
            vec![
                OsString::from("/lib/Show S01E01.mkv"),
                OsString::from("tracks"),
                OsString::from("2:/lib/.sub.ass"),
            ]
        );

        let options = RemuxOptions {
            language: "eng".to_string(),
            track_name: "MegumiDownloadFixed".to_string(),
        };
        let args: Vec<String> = MkvToolNix::remux_args(media, &t, sub, out, &options)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-o",
                "/lib/.remux.mkv",
                "--subtitle-tracks",
                "!2",
                "/lib/Show S01E01.mkv",
                "--language",
                "0:eng",
                "--track-name",
                "0:MegumiDownloadFixed",
                "--default-track-flag",
                "0:yes",
                "/lib/.sub.ass",
                "--track-order",
                "0:0,0:1,1:0",
            ]
        );
    }

    #[test]
    fn test_replacement_keeps_slot_of_first_track() {
        let options = RemuxOptions {
            language: "eng".to_string(),
            track_name: "Fixed".to_string(),
        };
        let args: Vec<String> = MkvToolNix::remux_args(
            Path::new("in.mkv"),
            &track(0, "S_TEXT/UTF8"),
            Path::new("sub.srt"),
            Path::new("out.mkv"),
            &options,
        )
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

        assert_eq!(&args[args.len() - 2..], ["--track-order", "1:0"]);
        let flag = args.iter().position(|a| a == "--default-track-flag").unwrap();
        assert_eq!(args[flag + 1], "0:no");
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let tools = MkvToolNix::new(
            PathBuf::from("/nonexistent/mkvextract"),
            PathBuf::from("/nonexistent/mkvmerge"),
        );
        let err = tools.subtitle_tracks(Path::new("a.mkv")).await.unwrap_err();
        assert!(matches!(err, MegumiError::SubtitleToolMissing { .. }));
    }
}
