//! Error types shared across Lenscast crates.

use std::path::PathBuf;

/// Top-level error type for Lenscast operations.
#[derive(Debug, thiserror::Error)]
pub enum LenscastError {
    /// The encoder process failed to start or died inside the startup
    /// window. The message carries the process's combined output.
    #[error("Capture device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Stream read error: {message}")]
    StreamRead { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Segment error: {message}")]
    Segments { message: String },

    #[error("No usable segments to merge")]
    NoUsableSegments,

    #[error("Merge encode failed: {message}")]
    MergeEncodeFailed { message: String },

    #[error("Merge output missing or empty: {path}")]
    MergeOutputMissing { path: PathBuf },

    #[error("Merge cancelled")]
    MergeCancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LenscastError.
pub type LenscastResult<T> = Result<T, LenscastError>;

impl LenscastError {
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: msg.into(),
        }
    }

    pub fn stream_read(msg: impl Into<String>) -> Self {
        Self::StreamRead {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn segments(msg: impl Into<String>) -> Self {
        Self::Segments {
            message: msg.into(),
        }
    }

    pub fn merge_encode(msg: impl Into<String>) -> Self {
        Self::MergeEncodeFailed {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
