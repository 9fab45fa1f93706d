//! Error types for the daemon.
//!
//! Segment-level failures (`FetchError`) are absorbed by the resolver;
//! stage-level failures (`TranscriptionError`, `TranslationError`,
//! `AssemblyError`) end the job as FAILED with the message kept verbatim.

use std::path::PathBuf;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepositoryError>;
pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: &'static str, secs: u64 },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }
}

/// Why a clip could not be fetched online. Never fatal to a job on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found online: {0}")]
    NotFound(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl FetchError {
    /// A fresh search may help; a rejected asset will be rejected again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::ValidationFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("resolution cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no segments to assemble: every sign is unresolved")]
    NoSegments,

    #[error("timing mismatch: planned {expected_ms} ms, rendered {actual_ms} ms")]
    TimingMismatch { expected_ms: u64, actual_ms: u64 },

    #[error("assembly timed out after {0} seconds")]
    Timeout(u64),

    #[error("segment order violated: {0}")]
    OutOfOrder(String),

    #[error("media error: {0}")]
    Media(MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for AssemblyError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Timeout { secs, .. } => AssemblyError::Timeout(secs),
            other => AssemblyError::Media(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transcription failed: {message}")]
pub struct TranscriptionError {
    pub message: String,
}

impl TranscriptionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("translation failed: {message}")]
pub struct TranslationError {
    pub message: String,
}

impl TranslationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("illegal job transition: {0}")]
    IllegalTransition(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Error)]
#[error("invalid configuration {key}={value}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}
