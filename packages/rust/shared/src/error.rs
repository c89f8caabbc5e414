//! Error types for rostermill.
//!
//! Library crates use [`RostermillError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all rostermill operations.
#[derive(Debug, thiserror::Error)]
pub enum RostermillError {
    /// Configuration loading or validation error (missing credential,
    /// missing prompt template, bad TOML).
    #[error("config error: {message}")]
    Config { message: String },

    /// A required input file does not exist.
    #[error("not found: {path:?}")]
    NotFound { path: PathBuf },

    /// Dataset schema error (required columns missing).
    #[error("schema error: {message}")]
    Schema { message: String },

    /// CSV parse or serialize error.
    #[error("csv error: {0}")]
    Csv(String),

    /// HTTP client construction error. Per-row request failures are not
    /// propagated through this type; they degrade to recorded strings.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RostermillError>;

impl RostermillError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a schema error from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RostermillError::config("OPENAI_API_KEY not set");
        assert_eq!(err.to_string(), "config error: OPENAI_API_KEY not set");

        let err = RostermillError::schema("missing column 'Website URL'");
        assert!(err.to_string().contains("Website URL"));
    }
}
