//! Error types shared across Versemotion crates.

use std::path::PathBuf;

/// Top-level error type for Versemotion operations.
#[derive(Debug, thiserror::Error)]
pub enum VersemotionError {
    /// Malformed caller input (frame dimensions, payload length). Never retried.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Frame image encode or durable write failed after exhausting retries.
    #[error("Frame write error: {message}")]
    FrameWrite { message: String },

    /// Post-write integrity check on a frame file failed.
    #[error("Verification error: {message}")]
    Verification { message: String },

    /// Session registry or session directory problem.
    #[error("Session error: {message}")]
    Session { message: String },

    /// The external encoder binary could not be spawned or probed.
    #[error("Encoder unavailable: {message}")]
    EncoderUnavailable { message: String },

    /// The external encoder exited with a non-zero status.
    #[error("Encoder failed: {message}")]
    EncoderFailed { message: String },

    /// The operation was cancelled by caller request.
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VersemotionError.
pub type VersemotionResult<T> = Result<T, VersemotionError>;

impl VersemotionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn frame_write(msg: impl Into<String>) -> Self {
        Self::FrameWrite {
            message: msg.into(),
        }
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn encoder_unavailable(msg: impl Into<String>) -> Self {
        Self::EncoderUnavailable {
            message: msg.into(),
        }
    }

    pub fn encoder_failed(msg: impl Into<String>) -> Self {
        Self::EncoderFailed {
            message: msg.into(),
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Stable machine-readable code, used in error notifications to observers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::FrameWrite { .. } => "frame_write_error",
            Self::Verification { .. } => "verification_error",
            Self::Session { .. } => "session_error",
            Self::EncoderUnavailable { .. } => "encoder_unavailable",
            Self::EncoderFailed { .. } => "encoder_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Config { .. } => "config_error",
            Self::FileNotFound { .. } => "file_not_found",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// True for user-initiated cancellation, which is never reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
