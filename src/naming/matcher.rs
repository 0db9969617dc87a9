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


//! Catalog matching and canonical naming
//!
//! Resolution is a pure function of the remote filename, the catalog and the
//! naming flags, so resolving the same name twice gives the same decision.
//!
//! # Episode detection
//! 1. An `SxxEyy` token anywhere after the matched key
//! 2. Otherwise the first standalone integer after the matched key that is
//!    not a year (1900-2099), a `Season N` number, or glued to letters
//!    (`x264`, `1080p`, `S2`). A `v2`-style version suffix is allowed.

use crate::catalog::{Catalog, CatalogRule};
use crate::config::SyncConfig;
use crate::error::{MegumiError, Result};
use crate::naming::paths::{
    canonical_file_name, destination_path, extension_of, sanitize_filename, season_directory,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

lazy_static! {
    static ref SEASON_EPISODE: Regex =
        Regex::new(r"(?i)(?:^|[^a-z0-9])s(\d{1,2})[ ._-]?e(\d{1,4})(?:v\d+)?(?:$|[^a-z0-9])")
            .expect("season/episode pattern");
    static ref NUMBER_TOKEN: Regex = Regex::new(r"\d+").expect("number pattern");
}

/// How the prepared file reaches its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementAction {
    /// Copy the transferred temp file into place, then delete the temp file
    Copy,
    /// Move an already-local file into place
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub source_temp_path: PathBuf,
    pub final_path: PathBuf,
    pub action: PlacementAction,
}

impl PlacementDecision {
    /// Directory the file lands in
    pub fn season_dir(&self) -> &Path {
        self.final_path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn final_name(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of resolving one remote filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub rule: CatalogRule,
    pub episode: Option<u32>,

    /// Renaming was wanted but no episode number could be found
    pub unrenamed: bool,

    pub decision: PlacementDecision,
}

/// Maps remote filenames to library paths
#[derive(Debug, Clone)]
pub struct Matcher {
    catalog: Arc<Catalog>,
    local_root: PathBuf,
    rename: bool,
    action: PlacementAction,
}

impl Matcher {
    pub fn new(catalog: Arc<Catalog>, config: &SyncConfig) -> Self {
        Self::with_options(catalog, config.local_root.clone(), config.rename, config.move_local)
    }

    pub fn with_options(catalog: Arc<Catalog>, local_root: PathBuf, rename: bool, move_local: bool) -> Self {
        Self {
            catalog,
            local_root,
            rename,
            action: if move_local {
                PlacementAction::Move
            } else {
                PlacementAction::Copy
            },
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve `remote_name` into a placement for `source_temp_path`
    ///
    /// Fails with `NoCatalogMatch` when no rule applies. A missing episode
    /// number is not an error: the sanitized original name is kept and the
    /// outcome is flagged `unrenamed`.
    pub fn resolve(&self, remote_name: &str, source_temp_path: &Path) -> Result<MatchOutcome> {
        let rule = self
            .catalog
            .find_match(remote_name)
            .ok_or_else(|| MegumiError::NoCatalogMatch(remote_name.to_string()))?;

        let after_key = remote_name
            .find(&rule.match_key)
            .map(|at| &remote_name[at + rule.match_key.len()..])
            .unwrap_or(remote_name);
        let episode = detect_episode(after_key);

        let (file_name, unrenamed) = match (self.rename, episode) {
            (true, Some(episode)) => (
                canonical_file_name(
                    &rule.display_name,
                    rule.season_number,
                    episode,
                    &extension_of(remote_name),
                ),
                false,
            ),
            (true, None) => (sanitize_filename(remote_name), true),
            (false, _) => (sanitize_filename(remote_name), false),
        };

        let season_dir = season_directory(&self.local_root, &rule.display_name, rule.season_number);
        let final_path = destination_path(&season_dir, &file_name)?;

        Ok(MatchOutcome {
            rule: rule.clone(),
            episode,
            unrenamed,
            decision: PlacementDecision {
                source_temp_path: source_temp_path.to_path_buf(),
                final_path,
                action: self.action,
            },
        })
    }
}

/// Best-effort episode number from the tail of a filename
pub fn detect_episode(name: &str) -> Option<u32> {
    let extension = extension_of(name);
    let stem = &name[..name.len() - extension.len()];

    if let Some(caps) = SEASON_EPISODE.captures(stem) {
        return caps[2].parse().ok();
    }

    for token in NUMBER_TOKEN.find_iter(stem) {
        let before = &stem[..token.start()];
        let after = &stem[token.end()..];

        if before.chars().next_back().is_some_and(|c| c.is_alphanumeric()) {
            continue;
        }
        let standalone = match after.chars().next() {
            None => true,
            Some(c) if !c.is_alphanumeric() => true,
            Some(_) => is_version_suffix(after),
        };
        if !standalone || token.as_str().len() > 4 {
            continue;
        }

        let Ok(value) = token.as_str().parse::<u32>() else {
            continue;
        };
        if token.as_str().len() == 4 && (1900..=2099).contains(&value) {
            continue;
        }
        if follows_season_word(before) {
            continue;
        }
        return Some(value);
    }

    None
}

/// `v2`, `V3` followed by a separator or the end
fn is_version_suffix(rest: &str) -> bool {
    let Some(tail) = rest.strip_prefix(|c: char| c == 'v' || c == 'V') else {
        return false;
    };
    let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && tail[digits..].chars().next().map_or(true, |c| !c.is_alphanumeric())
}

fn follows_season_word(before: &str) -> bool {
    before
        .trim_end_matches(|c: char| c == ' ' || c == '.' || c == '_' || c == '-')
        .to_lowercase()
        .ends_with("season")
}
