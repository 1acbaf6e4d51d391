//! Error types for assetweave.
//!
//! Library crates use [`AssetweaveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all assetweave operations.
///
/// Per-document and per-group failures travel down the output stream as
/// values of this type; they never abort sibling groups.
#[derive(Debug, thiserror::Error)]
pub enum AssetweaveError {
    /// A document arrived with streaming (not fully buffered) contents.
    #[error("streaming not supported: {}", path.display())]
    UnsupportedInput { path: PathBuf },

    /// Pattern expansion or file retrieval failed.
    #[error("retrieval error for {pattern}: {message}")]
    Retrieval { pattern: String, message: String },

    /// A configured transform stage failed for a group.
    #[error("transform error in group {group}: {message}")]
    Transform { group: String, message: String },

    /// A rewritten document or asset could not be emitted.
    #[error("emit error: {message}")]
    Emit { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Reference extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AssetweaveError>;

impl AssetweaveError {
    /// Create an unsupported-input error for the document at `path`.
    pub fn unsupported_input(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedInput { path: path.into() }
    }

    /// Create a retrieval error for a pattern.
    pub fn retrieval(pattern: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Retrieval {
            pattern: pattern.into(),
            message: msg.into(),
        }
    }

    /// Create a transform error for a group.
    pub fn transform(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transform {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create an emit error from any displayable message.
    pub fn emit(msg: impl Into<String>) -> Self {
        Self::Emit {
            message: msg.into(),
        }
    }

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

    /// Whether this error stops processing of the document it belongs to.
    pub fn is_fatal_to_document(&self) -> bool {
        matches!(self, Self::UnsupportedInput { .. } | Self::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AssetweaveError::unsupported_input("/site/index.html");
        assert_eq!(err.to_string(), "streaming not supported: /site/index.html");

        let err = AssetweaveError::transform("app.js", "boom");
        assert!(err.to_string().contains("app.js"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn fatal_classification() {
        assert!(AssetweaveError::unsupported_input("a.html").is_fatal_to_document());
        assert!(!AssetweaveError::retrieval("a/*.css", "denied").is_fatal_to_document());
        assert!(!AssetweaveError::emit("closed").is_fatal_to_document());
    }
}
