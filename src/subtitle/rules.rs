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


//! Ordered literal replacement rules
//!
//! Rules run in declaration order and each one replaces every occurrence
//! before the next one runs, so a later rule sees the output of earlier
//! ones: `[A→B, B→C]` turns `A` into `C`. Running the same ruleset twice is
//! therefore not guaranteed to be a no-op.
//!
//! # Rule file format
//! One `old|new` pair per line, split at the first `|`. Blank lines and lines
//! starting with `#` are skipped. Whitespace inside a rule is kept.

use crate::error::{MegumiError, Result};
use serde::{Deserialize, Serialize};

/// Literal substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub old_text: String,
    pub new_text: String,
}

impl ReplacementRule {
    pub fn new(old_text: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self {
            old_text: old_text.into(),
            new_text: new_text.into(),
        }
    }
}

/// Text subtitle formats whose payload can be rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleFormat {
    Ass,
    Ssa,
    Srt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Ass => "ass",
            SubtitleFormat::Ssa => "ssa",
            SubtitleFormat::Srt => "srt",
        }
    }
}

/// Parse and validate a rule file
///
/// Fails with `InvalidRuleset` on a line without `|`, an empty `old` side,
/// or a file with no rules at all.
pub fn parse_rules(text: &str) -> Result<Vec<ReplacementRule>> {
    let mut rules = Vec::new();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((old_text, new_text)) = line.split_once('|') else {
            return Err(MegumiError::InvalidRuleset(format!(
                "line {}: expected old|new, got '{}'",
                number + 1,
                line
            )));
        };
        if old_text.is_empty() {
            return Err(MegumiError::InvalidRuleset(format!(
                "line {}: empty text to replace",
                number + 1
            )));
        }
        rules.push(ReplacementRule::new(old_text, new_text));
    }

    if rules.is_empty() {
        return Err(MegumiError::InvalidRuleset("no rules".to_string()));
    }
    Ok(rules)
}

/// Built-in fixes applied ahead of series rules
///
/// Stutters are normalized to the capitalized form (`A-a` becomes `A-A`,
/// `Wh-wh` becomes `W-Wh`) and ASS hard breaks get a trailing space.
pub fn standard_fixes() -> Vec<ReplacementRule> {
    let mut rules = vec![
        ReplacementRule::new("Wh-wh", "W-Wh"),
        ReplacementRule::new("Wh-Wh", "W-Wh"),
        ReplacementRule::new("Th-th", "T-Th"),
        ReplacementRule::new("Th-Th", "T-Th"),
    ];
    // V-v and X-x are left alone
    for upper in ('A'..='Z').filter(|c| *c != 'V' && *c != 'X') {
        let lower = upper.to_ascii_lowercase();
        rules.push(ReplacementRule::new(
            format!("{}-{}", upper, lower),
            format!("{}-{}", upper, upper),
        ));
    }
    rules.push(ReplacementRule::new("\\N", "\\N "));
    rules.push(ReplacementRule::new("\\h", "\\h "));
    rules
}

/// Apply every rule in order to `text`
pub fn apply_rules(text: &str, rules: &[ReplacementRule]) -> String {
    rules.iter().fold(text.to_string(), |acc, rule| {
        if acc.contains(&rule.old_text) {
            acc.replace(&rule.old_text, &rule.new_text)
        } else {
            acc
        }
    })
}

/// Rewrite only the spoken text of a subtitle document
///
/// ASS/SSA: the `Text` field of `Dialogue:` lines, outside `{...}` override
/// blocks. SRT: lines after the index and timing line of each cue.
pub fn rewrite_document(document: &str, format: SubtitleFormat, rules: &[ReplacementRule]) -> String {
    match format {
        SubtitleFormat::Ass | SubtitleFormat::Ssa => rewrite_ass(document, rules),
        SubtitleFormat::Srt => rewrite_srt(document, rules),
    }
}

/// Split a line into its content and its line ending
fn split_ending(line: &str) -> (&str, &str) {
    let content = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    (content, &line[content.len()..])
}

fn rewrite_ass(document: &str, rules: &[ReplacementRule]) -> String {
    let mut out = String::with_capacity(document.len());
    // Text is the tenth field unless the Format line says otherwise
    let mut field_count = 10;
    let mut in_events = false;

    for line in document.split_inclusive('\n') {
        let (content, ending) = split_ending(line);
        let trimmed = content.trim_start();

        if trimmed.starts_with('[') {
            in_events = trimmed.eq_ignore_ascii_case("[events]");
        } else if in_events && trimmed.starts_with("Format:") {
            field_count = trimmed.split(',').count().max(1);
        } else if let Some(fields) = trimmed.strip_prefix("Dialogue:") {
            let prefix_len = content.len() - fields.len();
            let mut parts = fields.splitn(field_count, ',');
            let mut head = String::new();
            for _ in 0..field_count - 1 {
                match parts.next() {
                    Some(part) => {
                        head.push_str(part);
                        head.push(',');
                    }
                    None => break,
                }
            }
            if let Some(text) = parts.next() {
                out.push_str(&content[..prefix_len]);
                out.push_str(&head);
                out.push_str(&rewrite_outside_overrides(text, rules));
                out.push_str(ending);
                continue;
            }
        }

        out.push_str(line);
    }

    out
}

/// Apply rules to the text between `{...}` blocks, leaving the blocks as-is
fn rewrite_outside_overrides(text: &str, rules: &[ReplacementRule]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while !rest.is_empty() {
        match rest.find('{') {
            Some(open) => {
                out.push_str(&apply_rules(&rest[..open], rules));
                match rest[open..].find('}') {
                    Some(close) => {
                        out.push_str(&rest[open..open + close + 1]);
                        rest = &rest[open + close + 1..];
                    }
                    None => {
                        out.push_str(&rest[open..]);
                        rest = "";
                    }
                }
            }
            None => {
                out.push_str(&apply_rules(rest, rules));
                rest = "";
            }
        }
    }

    out
}

#[derive(Clone, Copy, PartialEq)]
enum SrtLine {
    Index,
    Timing,
    Text,
}

fn rewrite_srt(document: &str, rules: &[ReplacementRule]) -> String {
    let mut out = String::with_capacity(document.len());
    let mut expect = SrtLine::Index;

    for line in document.split_inclusive('\n') {
        let (content, ending) = split_ending(line);
        let bare = content.trim().trim_start_matches('\u{feff}');

        if bare.is_empty() {
            expect = SrtLine::Index;
            out.push_str(line);
            continue;
        }

        match expect {
            SrtLine::Index if bare.chars().all(|c| c.is_ascii_digit()) => {
                expect = SrtLine::Timing;
                out.push_str(line);
            }
            SrtLine::Index | SrtLine::Timing if bare.contains("-->") => {
                expect = SrtLine::Text;
                out.push_str(line);
            }
            _ => {
                expect = SrtLine::Text;
                out.push_str(&apply_rules(content, rules));
                out.push_str(ending);
            }
        }
    }

    out
}
