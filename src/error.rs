//! Error types for Megumi Download
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by pipeline stage (transfer, matching, subtitles,
//! placement) so the orchestrator can decide whether a failure is fatal for an
//! item, a non-fatal skip, or something worth retrying.
//!
//! ## Stage policy
//!
//! - Transfer errors are retried per chunk, then fail the whole item
//! - `NoCatalogMatch` skips the item
//! - `NamingAmbiguous` lets the item continue unrenamed
//! - Subtitle errors leave the placed media file untouched
//! - `PlacementFailed` fails the item

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our MegumiError type
pub type Result<T> = std::result::Result<T, MegumiError>;

/// Main error type for Megumi Download
#[derive(Error, Debug)]
pub enum MegumiError {
    // ===== Transfer Errors =====

    /// Network connectivity error while listing or reading the remote store
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// A range read ended before the requested span was delivered
    #[error("Transfer of {path} interrupted at byte {offset}")]
    TransferInterrupted {
        path: String,
        offset: u64,
    },

    /// Local copy does not match the remote size after all chunks completed
    #[error("Transfer size mismatch: expected {expected} bytes, got {actual} bytes")]
    FileSizeMismatch {
        expected: u64,
        actual: u64,
    },

    /// A chunk kept failing after every retry was spent
    #[error("Chunk {index} failed after {attempts} attempts: {message}")]
    ChunkRetriesExhausted {
        index: usize,
        attempts: u32,
        message: String,
    },

    /// Server returned a status code the range protocol does not allow
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Server ignored or mangled a byte-range request
    #[error("Range request not honoured: {0}")]
    RangeNotSupported(String),

    // ===== Matching Errors =====

    /// No catalog rule matched the remote filename
    #[error("No catalog rule matches '{0}'")]
    NoCatalogMatch(String),

    /// Episode number could not be derived from the filename
    #[error("Could not determine episode number for '{0}'")]
    NamingAmbiguous(String),

    // ===== Subtitle Errors =====

    /// The multiplexing tool could not be started
    #[error("Subtitle tool not found: {tool}")]
    SubtitleToolMissing {
        tool: String,
    },

    /// The multiplexing tool exited unsuccessfully
    #[error("Subtitle tool failed: {tool} (code={code:?}) {stderr}")]
    SubtitleToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Replacement ruleset is empty or has malformed lines
    #[error("Invalid replacement ruleset: {0}")]
    InvalidRuleset(String),

    /// Container has no subtitle track to rewrite
    #[error("No subtitle track found in {0}")]
    NoSubtitleTrack(String),

    /// Subtitle track is not text based
    #[error("Unsupported subtitle codec: {0}")]
    UnsupportedSubtitleCodec(String),

    // ===== Placement Errors =====

    /// File could not be made visible at its destination
    #[error("Placement failed for {path}: {message}")]
    PlacementFailed {
        path: PathBuf,
        message: String,
    },

    // ===== File Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Configuration Errors =====

    /// Configuration value is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Required configuration key is missing
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Another process holds the instance lock
    #[error("Another instance is already running (lock file {0})")]
    InstanceLocked(PathBuf),

    // ===== General Errors =====

    /// Operation is invalid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<std::num::ParseIntError> for MegumiError {
    fn from(err: std::num::ParseIntError) -> Self {
        MegumiError::InvalidConfiguration(format!("Failed to parse integer: {}", err))
    }
}

// Helper methods for creating common errors
impl MegumiError {
    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        MegumiError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a PlacementFailed error
    pub fn placement<S: Into<String>>(path: impl Into<PathBuf>, message: S) -> Self {
        MegumiError::PlacementFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        MegumiError::InternalError(message.into())
    }

    /// Check if error is retryable at chunk level
    ///
    /// Returns `true` for transient errors that might succeed on retry:
    /// - Network errors marked as transient
    /// - Interrupted range reads (resume from current offset)
    /// - 5xx server errors
    /// - reqwest timeouts and connection failures
    pub fn is_retryable(&self) -> bool {
        match self {
            MegumiError::NetworkError { is_transient, .. } => *is_transient,
            MegumiError::TransferInterrupted { .. } => true,
            MegumiError::UnexpectedStatusCode { status_code, .. } => {
                (500..=599).contains(status_code)
            }
            MegumiError::ReqwestError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            _ => false,
        }
    }

    /// Check if error belongs to the transfer stage
    pub fn is_transfer_error(&self) -> bool {
        matches!(
            self,
            MegumiError::NetworkError { .. }
                | MegumiError::TransferInterrupted { .. }
                | MegumiError::FileSizeMismatch { .. }
                | MegumiError::ChunkRetriesExhausted { .. }
                | MegumiError::UnexpectedStatusCode { .. }
                | MegumiError::RangeNotSupported(_)
                | MegumiError::ReqwestError(_)
        )
    }

    /// Check if error belongs to the subtitle stage
    pub fn is_subtitle_error(&self) -> bool {
        matches!(
            self,
            MegumiError::SubtitleToolMissing { .. }
                | MegumiError::SubtitleToolFailed { .. }
                | MegumiError::InvalidRuleset(_)
                | MegumiError::NoSubtitleTrack(_)
                | MegumiError::UnsupportedSubtitleCodec(_)
        )
    }

    /// Get user-friendly error message suitable for the run summary
    pub fn user_message(&self) -> String {
        match self {
            MegumiError::SubtitleToolMissing { tool } => {
                format!("{} is required but not found. Install MKVToolNix or set its path in config.megumi.", tool)
            }
            MegumiError::FileSizeMismatch { expected, actual } => {
                format!(
                    "Transfer verification failed (expected {} bytes, got {} bytes). It will be retried on the next run.",
                    expected, actual
                )
            }
            MegumiError::ChunkRetriesExhausted { index, attempts, .. } => {
                format!("Chunk {} could not be fetched after {} attempts. It will be retried on the next run.", index, attempts)
            }
            MegumiError::InstanceLocked(_) => {
                "Another instance of Megumi Download is already running.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MegumiError::network_error("reset", true).is_retryable());
        assert!(!MegumiError::network_error("forbidden", false).is_retryable());
        assert!(MegumiError::TransferInterrupted { path: "a".into(), offset: 3 }.is_retryable());
        assert!(MegumiError::UnexpectedStatusCode { status_code: 503, url: "u".into() }.is_retryable());
        assert!(!MegumiError::UnexpectedStatusCode { status_code: 404, url: "u".into() }.is_retryable());
        assert!(!MegumiError::FileSizeMismatch { expected: 2, actual: 1 }.is_retryable());
    }

    #[test]
    fn test_stage_classification() {
        assert!(MegumiError::FileSizeMismatch { expected: 2, actual: 1 }.is_transfer_error());
        assert!(MegumiError::InvalidRuleset("empty".into()).is_subtitle_error());
        assert!(!MegumiError::NoCatalogMatch("x".into()).is_transfer_error());
    }
}
