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


//! Subtitle post-processing
//!
//! # Modules
//! - `rules` - replacement rules and text payload rewriting
//! - `source` - where a series' rules come from
//! - `mkvtoolnix` - demux/mux capability and its MKVToolNix implementation
//! - `processor` - extract, rewrite, remux and replace

pub mod mkvtoolnix;
pub mod processor;
pub mod rules;
pub mod source;

pub use mkvtoolnix::{MkvToolNix, RemuxOptions, SubtitleMuxer, SubtitleTrack};
pub use processor::{SubtitleOutcome, SubtitleProcessor};
pub use rules::{apply_rules, parse_rules, standard_fixes, ReplacementRule, SubtitleFormat};
pub use source::{locate_rules, RuleSourceCache};
