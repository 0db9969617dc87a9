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


//! HTTP remote store with byte-range reads
//!
//! # Protocol
//! - Listing: `GET <dir>/` returning a JSON autoindex
//!   (`[{"name": .., "type": "file", "mtime": "<RFC 2822>", "size": ..}]`)
//! - Range read: `Range: bytes=<first>-<last>`, answered with
//!   `206 Partial Content` and a matching `Content-Range`
//! - Removal: `DELETE <path>`

use crate::error::{MegumiError, Result};
use crate::remote::{join_remote, RangeReader, RemoteEntry, RemoteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use url::Url;

/// One row of a JSON autoindex listing
#[derive(Debug, Deserialize)]
struct AutoindexEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    mtime: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// HTTP-backed store
pub struct HttpStore {
    /// HTTP client
    client: Client,

    /// Base URL, always ending in `/`
    base_url: Url,

    /// Basic auth credentials
    credentials: Option<(String, Option<String>)>,

    /// Extra request headers
    request_headers: HashMap<String, String>,
}

impl HttpStore {
    /// Create a store rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized).map_err(|e| {
            MegumiError::InvalidConfiguration(format!("Invalid remote URL {}: {}", base_url, e))
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials: None,
            request_headers: HashMap::new(),
        })
    }

    /// Send basic auth with every request
    pub fn with_basic_auth(mut self, user: String, password: Option<String>) -> Self {
        self.credentials = Some((user, password));
        self
    }

    /// Send extra headers with every request
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request_headers = headers;
        self
    }

    /// Build the URL of a remote path, percent-encoding each segment
    pub fn url_for(&self, path: &str, directory: bool) -> Result<Url> {
        let mut relative = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if directory && !relative.is_empty() {
            relative.push('/');
        }
        self.base_url
            .join(&relative)
            .map_err(|e| MegumiError::InvalidPath(format!("{}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        for (key, value) in &self.request_headers {
            if !key.eq_ignore_ascii_case("range") {
                request = request.header(key, value);
            }
        }
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| MegumiError::network_error(format!("Request failed: {}", e), true))
    }
}

/// Parse a JSON autoindex body into entries under `dir`
pub fn parse_autoindex(dir: &str, body: &str) -> Result<Vec<RemoteEntry>> {
    let rows: Vec<AutoindexEntry> = serde_json::from_str(body)?;
    let mut listing: Vec<RemoteEntry> = rows
        .into_iter()
        .filter(|row| row.kind == "file")
        .map(|row| RemoteEntry {
            remote_path: join_remote(dir, &row.name),
            size_bytes: row.size.unwrap_or(0),
            modified_time: row
                .mtime
                .as_deref()
                .and_then(|m| DateTime::parse_from_rfc2822(m).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
        .collect();
    listing.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
    Ok(listing)
}

/// Parse `Content-Range: bytes first-last/total`
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim();
    let (range, total) = spec.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    let first = first.trim().parse().ok()?;
    let last = last.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((first, last, total))
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let url = self.url_for(dir, true)?;
        let response = self.send(self.request(Method::GET, url.clone())).await?;

        if !response.status().is_success() {
            return Err(MegumiError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        parse_autoindex(dir, &body)
    }

    async fn open_range(&self, path: &str, offset: u64, length: u64) -> Result<RangeReader> {
        if length == 0 {
            return Ok(Box::new(tokio::io::empty()));
        }

        let url = self.url_for(path, false)?;
        let last = offset + length - 1;
        let request = self
            .request(Method::GET, url.clone())
            .header("Range", format!("bytes={}-{}", offset, last));
        let response = self.send(request).await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get("content-range")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| MegumiError::RangeNotSupported("No Content-Range header".to_string()))?;

                match parse_content_range(content_range) {
                    Some((first, end, _)) if first == offset && end == last => {}
                    _ => {
                        return Err(MegumiError::RangeNotSupported(format!(
                            "asked for {}-{}, server sent {}",
                            offset, last, content_range
                        )))
                    }
                }
            }
            // Full body is only usable when the span starts at zero
            StatusCode::OK if offset == 0 => {}
            StatusCode::OK => {
                return Err(MegumiError::RangeNotSupported(
                    "Server does not support range requests".to_string(),
                ))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(MegumiError::RangeNotSupported(
                    "Range not satisfiable - file may have changed".to_string(),
                ))
            }
            status => {
                return Err(MegumiError::UnexpectedStatusCode {
                    status_code: status.as_u16(),
                    url: url.to_string(),
                })
            }
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let reader = StreamReader::new(Box::pin(stream));
        Ok(Box::new(reader.take(length)))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let url = self.url_for(path, false)?;
        let response = self.send(self.request(Method::DELETE, url.clone())).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(MegumiError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_autoindex() {
        let body = r#"[
            { "name":"sub", "type":"directory", "mtime":"Sat, 17 Oct 2026 10:00:00 GMT" },
            { "name":"[Grp] Show - 02.mkv", "type":"file", "mtime":"Sat, 17 Oct 2026 10:00:00 GMT", "size":2048 },
            { "name":"[Grp] Show - 01.mkv", "type":"file", "size":1024 }
        ]"#;
        let listing = parse_autoindex("/done", body).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].remote_path, "/done/[Grp] Show - 01.mkv");
        assert!(listing[0].modified_time.is_none());
        assert_eq!(listing[1].size_bytes, 2048);
        assert!(listing[1].modified_time.is_some());
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 0-99/1000"), Some((0, 99, Some(1000))));
        assert_eq!(parse_content_range("bytes 100-199/*"), Some((100, 199, None)));
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes x-1/2"), None);
    }

    #[test]
    fn test_url_for_encodes_segments() {
        let store = HttpStore::new("https://seedbox.example/files").unwrap();
        let url = store.url_for("/done/[Grp] Show - 01.mkv", false).unwrap();
        assert_eq!(
            url.as_str(),
            "https://seedbox.example/files/done/%5BGrp%5D%20Show%20-%2001.mkv"
        );
        let dir = store.url_for("/done", true).unwrap();
        assert_eq!(dir.as_str(), "https://seedbox.example/files/done/");
    }
}
