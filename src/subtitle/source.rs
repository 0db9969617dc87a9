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


//! Locating a series' replacement rules
//!
//! # Lookup order
//! 1. The catalog's replacement source: a URL (fetched once per run) or a
//!    file path (relative paths resolve against the season directory)
//! 2. `replace.txt` in the season directory
//! 3. `replace.txt` in the series directory
//!
//! Built-in fixes are prepended only when a series ruleset was found.

use crate::catalog::{CatalogRule, ReplacementSource};
use crate::config::decode_text;
use crate::error::{MegumiError, Result};
use crate::subtitle::rules::{parse_rules, standard_fixes, ReplacementRule};
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Rule file looked up next to placed episodes
pub const RULE_FILE_NAME: &str = "replace.txt";

type Fetched = std::result::Result<Arc<Vec<ReplacementRule>>, String>;

/// Remote rulesets fetched during this run
///
/// Concurrent lookups of the same URL share one request; failures are
/// cached too, so an unreachable ruleset is reported once per item without
/// hammering the server.
pub struct RuleSourceCache {
    client: Client,
    entries: Mutex<HashMap<String, Arc<OnceCell<Fetched>>>>,
}

impl Default for RuleSourceCache {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl RuleSourceCache {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by a client with sensible timeouts
    pub fn with_timeouts() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::new(client))
    }

    /// Validated ruleset at `url`, fetched at most once
    pub async fn fetch(&self, url: &str) -> Result<Arc<Vec<ReplacementRule>>> {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| MegumiError::internal("rule cache poisoned"))?;
            Arc::clone(entries.entry(url.to_string()).or_default())
        };

        let fetched = cell
            .get_or_init(|| async {
                info!(url, "fetching replacement rules");
                self.download(url).await.map(Arc::new).map_err(|e| e.to_string())
            })
            .await;

        fetched
            .clone()
            .map_err(|message| MegumiError::InvalidRuleset(format!("{}: {}", url, message)))
    }

    /// Number of URLs requested so far
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn download(&self, url: &str) -> Result<Vec<ReplacementRule>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MegumiError::network_error(e.to_string(), true))?;

        if !response.status().is_success() {
            return Err(MegumiError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        parse_rules(&decode_text(&bytes))
    }
}

/// Rules for the series of `rule`, or `None` when the series has none
///
/// `InvalidRuleset` is returned for an unreachable or malformed source.
pub async fn locate_rules(
    rule: &CatalogRule,
    season_dir: &Path,
    cache: &RuleSourceCache,
    with_standard_fixes: bool,
) -> Result<Option<Vec<ReplacementRule>>> {
    let series_rules = match &rule.replacement_source {
        Some(ReplacementSource::Url(url)) => Some(cache.fetch(url).await?.as_ref().clone()),
        Some(ReplacementSource::Path(path)) => {
            let path = if path.is_relative() {
                season_dir.join(path)
            } else {
                path.clone()
            };
            Some(read_rule_file(&path).await?)
        }
        None => match local_rule_file(season_dir).await {
            Some(path) => Some(read_rule_file(&path).await?),
            None => None,
        },
    };

    Ok(series_rules.map(|rules| {
        if with_standard_fixes {
            let mut combined = standard_fixes();
            combined.extend(rules);
            combined
        } else {
            rules
        }
    }))
}

async fn local_rule_file(season_dir: &Path) -> Option<PathBuf> {
    let mut candidates = vec![season_dir.join(RULE_FILE_NAME)];
    if let Some(series_dir) = season_dir.parent() {
        candidates.push(series_dir.join(RULE_FILE_NAME));
    }
    for candidate in candidates {
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            debug!(path = %candidate.display(), "using local replacement rules");
            return Some(candidate);
        }
    }
    None
}

async fn read_rule_file(path: &Path) -> Result<Vec<ReplacementRule>> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        MegumiError::InvalidRuleset(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_rules(&decode_text(&bytes))
        .map_err(|e| MegumiError::InvalidRuleset(format!("{}: {}", path.display(), e)))
}
