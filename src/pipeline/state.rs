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


//! Per-item pipeline states
//!
//! ```text
//! Listed -> Transferring -> Verified -> Matching -> Placed -> SubtitleProcessing -> Done
//!   |            |                         |           |
//!   v            v                         v           v
//! Skipped      Failed               Skipped/Failed   Failed
//! ```

use crate::error::{MegumiError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    #[serde(rename = "listed")]
    Listed,
    #[serde(rename = "transferring")]
    Transferring,
    #[serde(rename = "verified")]
    Verified,
    #[serde(rename = "matching")]
    Matching,
    #[serde(rename = "placed")]
    Placed,
    #[serde(rename = "subtitle_processing")]
    SubtitleProcessing,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "failed")]
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Listed => "listed",
            ItemState::Transferring => "transferring",
            ItemState::Verified => "verified",
            ItemState::Matching => "matching",
            ItemState::Placed => "placed",
            ItemState::SubtitleProcessing => "subtitle_processing",
            ItemState::Done => "done",
            ItemState::Skipped => "skipped",
            ItemState::Failed => "failed",
        }
    }

    /// Check if state is terminal (done, skipped, or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Skipped | ItemState::Failed)
    }

    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Listed, Transferring)
                | (Listed, Skipped)
                | (Transferring, Verified)
                | (Transferring, Failed)
                | (Verified, Matching)
                | (Matching, Placed)
                | (Matching, Skipped)
                | (Matching, Failed)
                | (Placed, SubtitleProcessing)
                | (Placed, Failed)
                | (SubtitleProcessing, Done)
        )
    }

    /// Validated transition
    pub fn transition(self, next: ItemState) -> Result<ItemState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MegumiError::InvalidState(format!(
                "illegal item transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
