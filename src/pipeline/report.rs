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


//! Run summary

use crate::naming::matcher::PlacementDecision;
use crate::pipeline::state::ItemState;
use crate::subtitle::processor::SubtitleOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of one remote entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub remote_path: String,
    pub remote_name: String,
    pub state: ItemState,

    /// Why the item was skipped or failed
    pub reason: Option<String>,

    pub final_path: Option<PathBuf>,

    /// Placed under its original name because no episode number was found
    pub unrenamed: bool,

    pub subtitle: Option<SubtitleOutcome>,
}

impl ItemReport {
    pub fn new(remote_path: &str, remote_name: &str) -> Self {
        Self {
            remote_path: remote_path.to_string(),
            remote_name: remote_name.to_string(),
            state: ItemState::Listed,
            reason: None,
            final_path: None,
            unrenamed: false,
            subtitle: None,
        }
    }

    /// Worth a line of its own in the summary
    fn is_notable(&self) -> bool {
        self.state != ItemState::Done
            || self.unrenamed
            || self.subtitle.as_ref().is_some_and(SubtitleOutcome::needs_attention)
    }
}

/// Everything that happened in one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, items: Vec<ItemReport>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            items,
        }
    }

    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }

    pub fn done(&self) -> usize {
        self.count(ItemState::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(ItemState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemState::Failed)
    }

    pub fn item(&self, remote_path: &str) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.remote_path == remote_path)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "done={} skipped={} failed={}",
            self.done(),
            self.skipped(),
            self.failed()
        )?;
        for item in self.items.iter().filter(|i| i.is_notable()) {
            write!(f, "\n  [{}] {}", item.state, item.remote_name)?;
            if let Some(reason) = &item.reason {
                write!(f, ": {}", reason)?;
            }
            if item.unrenamed {
                write!(f, " (unrenamed)")?;
            }
            if let Some(subtitle) = item.subtitle.as_ref().filter(|s| s.needs_attention()) {
                write!(f, " (subtitles {})", subtitle)?;
            }
        }
        Ok(())
    }
}

/// Dry-run line for one remote entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedItem {
    pub remote_path: String,
    pub size_bytes: u64,
    pub decision: Option<PlacementDecision>,
    pub unrenamed: bool,

    /// Why nothing would happen
    pub note: Option<String>,
}

impl fmt::Display for PlannedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.decision, &self.note) {
            (Some(decision), _) => {
                write!(f, "{} -> {}", self.remote_path, decision.final_path.display())?;
                if self.unrenamed {
                    write!(f, " (unrenamed)")?;
                }
                Ok(())
            }
            (None, Some(note)) => write!(f, "{} (skip: {})", self.remote_path, note),
            (None, None) => write!(f, "{}", self.remote_path),
        }
    }
}
