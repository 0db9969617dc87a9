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


//! Run configuration
//!
//! `config.megumi` is a flat `KEY=VALUE` file with `ON`/`OFF` flags. It is
//! parsed exactly once into [`SyncConfig`]; nothing past this module looks at
//! raw strings again.
//!
//! # Accepted keys
//! - `REMOTEPATH` / `REMOTEPATCH` - remote root directory
//! - `REMOTEURL` - optional HTTP base URL of the remote store
//! - `USER`, `PASSWORD` - optional basic auth for the HTTP store
//! - `LOCALPATH` / `LOCALPATCH` - library root
//! - `LOCALTEMP` - temp directory for transfers
//! - `MOVELOCAL`, `RENAME`, `SAVEINFO`, `USE_CHUNKS`, `DELETEREMOTE`,
//!   `STANDARD_FIXES`, `LEDGER_METADATA` - flags
//! - `CHUNKS`, `BUFFER_SIZE`, `CONCURRENCY`, `RETRIES`, `RETRY_BACKOFF_MS`
//! - `SUBTITLE_TRACK`, `SUBTITLE_LANGUAGE`, `SUBTITLE_TRACK_NAME`
//! - `MKVEXTRACT`, `MKVMERGE` - tool paths

use crate::error::{MegumiError, Result};
use encoding_rs::{Encoding, SHIFT_JIS, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default read buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Strongly-typed run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote root directory to list
    pub remote_root: String,

    /// HTTP base URL of the remote store (None = mounted filesystem)
    pub remote_url: Option<String>,

    /// Basic auth user for the HTTP store
    pub remote_user: Option<String>,

    /// Basic auth password for the HTTP store
    pub remote_password: Option<String>,

    /// Library root
    pub local_root: PathBuf,

    /// Temp directory for in-flight transfers
    pub temp_dir: PathBuf,

    /// Treat the temp directory as already-local input (no transfer)
    pub move_local: bool,

    /// Rename into canonical `Show S01E05.ext` form
    pub rename: bool,

    /// Append original name to `info.txt` next to placed files
    pub save_info: bool,

    /// Split transfers into concurrent chunks
    pub chunked: bool,

    /// Number of chunks (and chunk workers) per transfer
    pub chunk_count: usize,

    /// Read buffer size in bytes
    pub buffer_size: usize,

    /// Items processed concurrently
    pub item_concurrency: usize,

    /// Retries per chunk before the transfer fails
    pub max_chunk_retries: u32,

    /// Base backoff between chunk retries in milliseconds
    pub retry_backoff_ms: u64,

    /// Remove the remote entry once the item is done
    pub delete_remote: bool,

    /// Apply built-in stutter/spacing fixes before series rules
    pub standard_fixes: bool,

    /// Also compare size and modification time in the processed ledger
    pub ledger_match_metadata: bool,

    /// Explicit subtitle track id (None = first subtitle track)
    pub subtitle_track: Option<u32>,

    /// Language tag for the rewritten subtitle track
    pub subtitle_language: String,

    /// Track name for the rewritten subtitle track
    pub subtitle_track_name: String,

    /// mkvextract executable
    pub mkvextract: PathBuf,

    /// mkvmerge executable
    pub mkvmerge: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_root: "/".to_string(),
            remote_url: None,
            remote_user: None,
            remote_password: None,
            local_root: PathBuf::from("library"),
            temp_dir: PathBuf::from("temp"),
            move_local: false,
            rename: true,
            save_info: false,
            chunked: true,
            chunk_count: 3,
            buffer_size: DEFAULT_BUFFER_SIZE,
            item_concurrency: 5,
            max_chunk_retries: 5,
            retry_backoff_ms: 500,
            delete_remote: false,
            standard_fixes: true,
            ledger_match_metadata: false,
            subtitle_track: None,
            subtitle_language: "eng".to_string(),
            subtitle_track_name: "MegumiDownloadFixed".to_string(),
            mkvextract: PathBuf::from("mkvextract"),
            mkvmerge: PathBuf::from("mkvmerge"),
        }
    }
}

impl SyncConfig {
    /// Load and parse `config.megumi`
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_config_text(path)?;
        Self::parse(&text)
    }

    /// Parse `KEY=VALUE` text into a typed config
    ///
    /// Relative `LOCALTEMP` is left as-is; the caller resolves it against the
    /// config directory.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut saw_local_root = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            match key.as_str() {
                "REMOTEPATH" | "REMOTEPATCH" => config.remote_root = value.to_string(),
                "REMOTEURL" => config.remote_url = non_empty(value),
                "USER" => config.remote_user = non_empty(value),
                "PASSWORD" => config.remote_password = non_empty(value),
                "LOCALPATH" | "LOCALPATCH" => {
                    config.local_root = PathBuf::from(value);
                    saw_local_root = true;
                }
                "LOCALTEMP" => config.temp_dir = PathBuf::from(value),
                "MOVELOCAL" => config.move_local = parse_flag(&key, value)?,
                "RENAME" => config.rename = parse_flag(&key, value)?,
                "SAVEINFO" => config.save_info = parse_flag(&key, value)?,
                "USE_CHUNKS" => config.chunked = parse_flag(&key, value)?,
                "DELETEREMOTE" => config.delete_remote = parse_flag(&key, value)?,
                "STANDARD_FIXES" => config.standard_fixes = parse_flag(&key, value)?,
                "LEDGER_METADATA" => config.ledger_match_metadata = parse_flag(&key, value)?,
                "CHUNKS" => config.chunk_count = parse_number(&key, value)?,
                "BUFFER_SIZE" => config.buffer_size = parse_number(&key, value)?,
                "CONCURRENCY" => config.item_concurrency = parse_number(&key, value)?,
                "RETRIES" => config.max_chunk_retries = parse_number(&key, value)?,
                "RETRY_BACKOFF_MS" => config.retry_backoff_ms = parse_number(&key, value)?,
                "SUBTITLE_TRACK" => config.subtitle_track = Some(parse_number(&key, value)?),
                "SUBTITLE_LANGUAGE" => config.subtitle_language = value.to_string(),
                "SUBTITLE_TRACK_NAME" => config.subtitle_track_name = value.to_string(),
                "MKVEXTRACT" => config.mkvextract = PathBuf::from(value),
                "MKVMERGE" => config.mkvmerge = PathBuf::from(value),
                other => debug!(key = other, "ignoring unknown config key"),
            }
        }

        if !saw_local_root {
            return Err(MegumiError::MissingRequiredField("LOCALPATH".to_string()));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.chunk_count == 0 {
            return Err(MegumiError::InvalidConfiguration(
                "CHUNKS must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(MegumiError::InvalidConfiguration(
                "BUFFER_SIZE must be at least 1".to_string(),
            ));
        }
        if self.item_concurrency == 0 {
            return Err(MegumiError::InvalidConfiguration(
                "CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.remote_url {
            url::Url::parse(url).map_err(|e| {
                MegumiError::InvalidConfiguration(format!("REMOTEURL '{}': {}", url, e))
            })?;
        }
        Ok(())
    }

    /// Resolve relative paths against the directory holding the config files
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        if self.temp_dir.is_relative() {
            self.temp_dir = base.join(&self.temp_dir);
        }
        if self.local_root.is_relative() {
            self.local_root = base.join(&self.local_root);
        }
        self
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_uppercase().as_str() {
        "ON" | "TRUE" | "YES" | "1" => Ok(true),
        "OFF" | "FALSE" | "NO" | "0" => Ok(false),
        _ => Err(MegumiError::InvalidConfiguration(format!(
            "{} must be ON or OFF, got '{}'",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        MegumiError::InvalidConfiguration(format!("{} must be a number, got '{}'", key, value))
    })
}

/// Read a config text file, decoding UTF-8, UTF-16, Shift-JIS or Latin-1
pub fn read_config_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(MegumiError::FileNotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    Ok(decode_text(&bytes))
}

/// Decode raw bytes with the fallback chain used for every config file
///
/// A byte order mark wins (UTF-8 or UTF-16, mark stripped). Without one the
/// bytes are tried as strict UTF-8, then as Shift-JIS, and finally as
/// Windows-1252, which never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_length)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let (text, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
    if !had_errors {
        return text.into_owned();
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}
