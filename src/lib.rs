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


//! Megumi Download
//!
//! Pulls finished episodes from a remote store, files them into a
//! `Show/Season NN/Show SNNENN.ext` library and rewrites their subtitles.
//!
//! # Modules
//! - [`config`] - `config.megumi` and text decoding
//! - [`catalog`] - series catalog and release-group filter
//! - [`remote`] - remote store sessions (directory, HTTP)
//! - [`transfer`] - chunked concurrent transfer with resume
//! - [`naming`] - catalog matching, canonical names, atomic placement
//! - [`subtitle`] - subtitle rules and MKVToolNix remuxing
//! - [`pipeline`] - per-item orchestration and run report
//! - [`instance`] - single-instance lock

pub mod catalog;
pub mod config;
pub mod error;
pub mod instance;
pub mod naming;
pub mod pipeline;
pub mod remote;
pub mod subtitle;
pub mod transfer;

pub use catalog::{Catalog, CatalogRule, ReleaseGroups, ReplacementSource};
pub use config::SyncConfig;
pub use error::{MegumiError, Result};
pub use instance::InstanceLock;
pub use pipeline::{store_for, Pipeline, ProcessedLedger, RunContext, RunReport};
pub use remote::{RemoteEntry, RemoteStore};
pub use subtitle::{MkvToolNix, SubtitleMuxer};
