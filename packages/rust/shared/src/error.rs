//! Error types for Geoenrich.
//!
//! Library crates use [`GeoenrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Geoenrich operations.
#[derive(Debug, thiserror::Error)]
pub enum GeoenrichError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Cache backend round trip failed (read or write).
    #[error("cache error: {0}")]
    Cache(String),

    /// Geocoding service error. Absorbed by the pipeline's geocoding stage;
    /// only surfaces from direct client use.
    #[error("geocode error: {0}")]
    Geocode(String),

    /// Record or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The run was cancelled before the input was exhausted.
    #[error("pipeline cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GeoenrichError>;

impl GeoenrichError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
