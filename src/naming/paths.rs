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


//! Library path layout and filename sanitization
//!
//! # Layout
//! `{local_root}/{display_name}/Season {NN}/{display_name} S{NN}E{NN}.{ext}`
//!
//! Every component is sanitized independently and limited to 255 bytes,
//! keeping the extension intact when a filename has to be shortened.

use crate::error::{MegumiError, Result};
use std::path::{Path, PathBuf};

#[cfg(target_os = "windows")]
const MAX_PATH_LENGTH: usize = 260;
#[cfg(not(target_os = "windows"))]
const MAX_PATH_LENGTH: usize = 4096;

/// Longest single path component, in bytes
pub const MAX_COMPONENT_LENGTH: usize = 255;

/// Season directory for a series
pub fn season_directory(local_root: &Path, display_name: &str, season_number: u32) -> PathBuf {
    local_root
        .join(sanitize_path_component(display_name))
        .join(format!("Season {:02}", season_number))
}

/// Canonical episode filename, `extension` including its leading dot
pub fn canonical_file_name(display_name: &str, season_number: u32, episode: u32, extension: &str) -> String {
    sanitize_filename(&format!(
        "{} S{:02}E{:02}{}",
        display_name, season_number, episode, extension
    ))
}

/// Full destination path, checked against the platform path limit
pub fn destination_path(season_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let path = season_dir.join(file_name);
    let length = path.to_string_lossy().len();
    if length > MAX_PATH_LENGTH {
        return Err(MegumiError::InvalidPath(format!(
            "Path too long ({} bytes): {}",
            length,
            path.display()
        )));
    }
    Ok(path)
}

/// Extension of a filename including the dot, or empty
///
/// Only short alphanumeric suffixes count, so `Show.Name.S01E05` has none.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| (1..=5).contains(&e.len()) && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Sanitize a filename, keeping its extension within the length limit
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = clean(name);
    let cleaned = if cleaned.is_empty() { "file".to_string() } else { cleaned };

    if cleaned.len() <= MAX_COMPONENT_LENGTH {
        return cleaned;
    }

    let extension = extension_of(&cleaned);
    let stem = &cleaned[..cleaned.len() - extension.len()];
    let room = MAX_COMPONENT_LENGTH.saturating_sub(extension.len());
    format!("{}{}", truncate_component(stem, room), extension)
}

/// Sanitize a directory name
pub fn sanitize_path_component(name: &str) -> String {
    let cleaned = clean(name);
    let cleaned = if cleaned.is_empty() { "folder".to_string() } else { cleaned };
    truncate_component(&cleaned, MAX_COMPONENT_LENGTH)
}

fn clean(name: &str) -> String {
    let replaced: String = name.chars().map(replace_char).collect();
    let trimmed = replaced.trim().trim_end_matches('.').trim_end();

    if cfg!(target_os = "windows") {
        handle_windows_reserved_names(trimmed)
    } else {
        trimmed.to_string()
    }
}

fn replace_char(c: char) -> char {
    match c {
        '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
        c if c.is_control() => '_',
        c => c,
    }
}

fn handle_windows_reserved_names(name: &str) -> String {
    let upper = name.to_uppercase();
    let stem = upper.split('.').next().unwrap_or("");
    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved.contains(&stem) {
        format!("_{}", name)
    } else {
        name.to_string()
    }
}

/// Cut `text` to at most `max_bytes` on a UTF-8 boundary
pub fn truncate_component(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut index = max_bytes;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    text[..index].trim_end().to_string()
}
