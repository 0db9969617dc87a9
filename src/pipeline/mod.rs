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


//! Per-item pipeline from remote listing to library
//!
//! # Modules
//! - `state` - item state machine
//! - `context` - run-scoped shared state
//! - `ledger` - processed markers
//! - `report` - run summary and dry-run plan
//! - `orchestrator` - concurrent item driver

pub mod context;
pub mod ledger;
pub mod orchestrator;
pub mod report;
pub mod state;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::remote::{HttpStore, LocalStore, RemoteStore};
use std::path::PathBuf;
use std::sync::Arc;

pub use context::{InFlightGuard, RunContext};
pub use ledger::{ProcessedLedger, ProcessedRecord};
pub use orchestrator::Pipeline;
pub use report::{ItemReport, PlannedItem, RunReport};
pub use state::ItemState;

/// Remote store described by `config`
///
/// - `MOVELOCAL=ON`: the temp directory itself
/// - `REMOTEURL` set: HTTP store, with basic auth when `USER` is given
/// - otherwise: the mounted `REMOTEPATH` directory
pub fn store_for(config: &SyncConfig) -> Result<Arc<dyn RemoteStore>> {
    if config.move_local {
        return Ok(Arc::new(LocalStore::new(config.temp_dir.clone())));
    }
    match &config.remote_url {
        Some(url) => {
            let mut store = HttpStore::new(url)?;
            if let Some(user) = &config.remote_user {
                store = store.with_basic_auth(user.clone(), config.remote_password.clone());
            }
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(LocalStore::new(PathBuf::from(&config.remote_root)))),
    }
}
