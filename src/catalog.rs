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


//! Series catalog and release-group filter
//!
//! # Catalog format (`serieslist.megumi`)
//! ```text
//! # match_key|display_name|season[|replacement_source]
//! Show.Name|Show Name|1
//! Another Show|Another Show|2|https://example.com/another.txt
//! ```
//!
//! Rules are read-only for the whole run. Lookup is first-match-wins in
//! declaration order.

use crate::config::read_config_text;
use crate::error::{MegumiError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a series' subtitle replacement rules come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementSource {
    /// HTTP(S) URL fetched once per run
    Url(String),
    /// Local rule file
    Path(PathBuf),
}

impl ReplacementSource {
    /// Classify a raw catalog field
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Some(Self::Url(raw.to_string()))
        } else {
            Some(Self::Path(PathBuf::from(raw)))
        }
    }
}

/// One catalog line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRule {
    /// Substring searched for in remote filenames
    pub match_key: String,

    /// Library folder name
    pub display_name: String,

    /// Season number (>= 1)
    pub season_number: u32,

    /// Optional subtitle replacement rules
    pub replacement_source: Option<ReplacementSource>,
}

impl CatalogRule {
    pub fn new(match_key: &str, display_name: &str, season_number: u32) -> Self {
        Self {
            match_key: match_key.to_string(),
            display_name: display_name.to_string(),
            season_number,
            replacement_source: None,
        }
    }

    pub fn with_replacement_source(mut self, source: ReplacementSource) -> Self {
        self.replacement_source = Some(source);
        self
    }
}

/// Ordered, read-only list of catalog rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    rules: Vec<CatalogRule>,
}

impl Catalog {
    pub fn new(rules: Vec<CatalogRule>) -> Self {
        Self { rules }
    }

    /// Load and parse `serieslist.megumi`
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_config_text(path)?;
        Self::parse(&text)
    }

    /// Parse catalog text, one `key|folder|season[|source]` rule per line
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('|').map(str::trim).collect();
            if fields.len() < 3 || fields.len() > 4 {
                return Err(MegumiError::InvalidConfiguration(format!(
                    "catalog line {}: expected 3 or 4 '|' separated fields, got {}",
                    line_no,
                    fields.len()
                )));
            }
            if fields[0].is_empty() || fields[1].is_empty() {
                return Err(MegumiError::InvalidConfiguration(format!(
                    "catalog line {}: match key and folder must not be empty",
                    line_no
                )));
            }

            let season_number = fields[2]
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    MegumiError::InvalidConfiguration(format!(
                        "catalog line {}: season '{}' is not a positive integer",
                        line_no, fields[2]
                    ))
                })?;

            rules.push(CatalogRule {
                match_key: fields[0].to_string(),
                display_name: fields[1].to_string(),
                season_number,
                replacement_source: fields.get(3).and_then(|raw| ReplacementSource::parse(raw)),
            });
        }

        Ok(Self { rules })
    }

    /// First rule whose match key occurs in `file_name`
    pub fn find_match(&self, file_name: &str) -> Option<&CatalogRule> {
        self.rules
            .iter()
            .find(|rule| file_name.contains(rule.match_key.as_str()))
    }

    pub fn rules(&self) -> &[CatalogRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Release groups whose uploads are eligible for transfer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseGroups {
    groups: Vec<String>,
}

impl ReleaseGroups {
    pub fn new(groups: Vec<String>) -> Self {
        Self { groups }
    }

    /// Load `groups.megumi`, one group per line
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_config_text(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let groups = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { groups }
    }

    /// Whether `file_name` carries a `[group]` or `【group】` tag.
    /// An empty list admits everything.
    pub fn admits(&self, file_name: &str) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        self.groups.iter().any(|group| {
            file_name.contains(&format!("[{}]", group))
                || file_name.contains(&format!("\u{3010}{}\u{3011}", group))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog() {
        let text = "\
# comment
Show.Name|Show Name|1

Other Show | Other Show | 2 | https://example.com/rules.txt
Local Rules|Local Rules|3|/srv/rules/local.txt
";
        let catalog = Catalog::parse(text).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.rules()[0], CatalogRule::new("Show.Name", "Show Name", 1));
        assert_eq!(
            catalog.rules()[1].replacement_source,
            Some(ReplacementSource::Url("https://example.com/rules.txt".to_string()))
        );
        assert_eq!(
            catalog.rules()[2].replacement_source,
            Some(ReplacementSource::Path(PathBuf::from("/srv/rules/local.txt")))
        );
    }

    #[test]
    fn test_parse_catalog_rejects_bad_lines() {
        assert!(Catalog::parse("only|two").is_err());
        assert!(Catalog::parse("a|b|zero").is_err());
        assert!(Catalog::parse("a|b|0").is_err());
        assert!(Catalog::parse("|b|1").is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let catalog = Catalog::new(vec![
            CatalogRule::new("Show", "Show", 1),
            CatalogRule::new("Show Name", "Show Name", 2),
        ]);
        let rule = catalog.find_match("[Group] Show Name - 05.mkv").unwrap();
        assert_eq!(rule.display_name, "Show");
        assert_eq!(rule.season_number, 1);

        assert!(catalog.find_match("Unrelated - 01.mkv").is_none());
    }

    #[test]
    fn test_release_groups() {
        let groups = ReleaseGroups::parse("SubsPlease\nErai-raws\n");
        assert!(groups.admits("[SubsPlease] Show - 01 (1080p).mkv"));
        assert!(groups.admits("\u{3010}Erai-raws\u{3011} Show - 01.mkv"));
        assert!(!groups.admits("SubsPlease Show - 01.mkv"));
        assert!(ReleaseGroups::default().admits("anything.mkv"));
    }
}
